//! Tool call supports.

mod completion;
mod error;
mod routing;

use async_trait::async_trait;

use crate::agent::AgentId;
use crate::markup::CommandBlock;

pub use completion::{COMPLETION_COMMAND, REPORT_FIELD, completion_report};
pub use error::{Error, ErrorKind};
pub use routing::{MESSAGE_FIELD, ROUTING_COMMAND, RoutingTool, TARGET_FIELD};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// One dispatched command: the parsed block plus its execution context.
pub struct ToolCall {
    /// The parsed command block. Tools parse their own fields from it.
    pub block: CommandBlock,
    /// The identifier of the agent executing the command.
    pub caller_id: AgentId,
    /// The display name of the agent executing the command.
    pub caller_name: String,
    /// Routing depth of the run this command executes in. Zero for a
    /// top-level run.
    pub depth: usize,
}

/// A tool that can be invoked by a command block found in model output.
///
/// Implementations of this trait should be stateless, and may not
/// maintain any internal state. A tool can still be context-aware: make
/// the context an immutable field set during initialization, the way
/// [`RoutingTool`] carries the agent directory.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Returns the name of the tool, which is also the command tag that
    /// invokes it.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str {
        ""
    }

    /// Executes the tool.
    ///
    /// Failures must be reported through the returned [`ToolResult`];
    /// the engine turns them into feedback the model can react to.
    async fn execute(&self, call: ToolCall) -> ToolResult;
}
