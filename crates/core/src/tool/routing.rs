use async_trait::async_trait;

use crate::agent::{RouteError, RunOutcome};
use crate::directory::AgentDirectory;
use crate::tool::{Error, Tool, ToolCall, ToolResult};

/// The reserved command that forwards a message to a peer agent.
pub const ROUTING_COMMAND: &str = "ask";

/// The field naming the peer to ask, by display name or identifier.
pub const TARGET_FIELD: &str = "target";

/// The field carrying the message for the peer.
pub const MESSAGE_FIELD: &str = "message";

/// Built-in tool that asks a peer agent and returns its final answer.
///
/// The peer's engine runs synchronously on the same call stack, so the
/// caller's turn blocks until the peer terminates. A peer that is
/// already mid-run (including the asking agent itself) is reported as
/// busy instead of waited on, which keeps routing cycles from
/// deadlocking. Nested asks are bounded by the routing depth budget.
pub struct RoutingTool {
    directory: AgentDirectory,
    max_depth: usize,
}

impl RoutingTool {
    pub(crate) fn new(directory: AgentDirectory, max_depth: usize) -> Self {
        Self {
            directory,
            max_depth,
        }
    }
}

#[async_trait]
impl Tool for RoutingTool {
    fn name(&self) -> &str {
        ROUTING_COMMAND
    }

    fn description(&self) -> &str {
        "Sends a message to a peer agent and returns its reply."
    }

    async fn execute(&self, call: ToolCall) -> ToolResult {
        let Some(target) = call.block.field(TARGET_FIELD) else {
            return Err(Error::missing_field(TARGET_FIELD));
        };
        let Some(message) = call.block.field(MESSAGE_FIELD) else {
            return Err(Error::missing_field(MESSAGE_FIELD));
        };
        if call.depth >= self.max_depth {
            return Err(Error::execution_error().with_reason(format!(
                "routing depth budget ({}) exhausted",
                self.max_depth
            )));
        }
        let Some(peer) = self.directory.get(target) else {
            return Err(Error::unknown_target()
                .with_reason(format!("no agent known as `{target}`")));
        };

        debug!(
            caller = call.caller_name,
            target = peer.name(),
            "routing a message"
        );
        match peer.route(message.to_owned(), call.depth + 1).await {
            Ok(RunOutcome::Finished(text)) => Ok(text),
            Ok(RunOutcome::Completed(report)) => {
                Ok(report.unwrap_or_default())
            }
            Ok(RunOutcome::BudgetExceeded) => {
                Err(Error::execution_error().with_reason(format!(
                    "agent `{target}` ran out of turns before answering"
                )))
            }
            Err(RouteError::Busy) => {
                Err(Error::target_busy().with_reason(format!(
                    "agent `{target}` is already handling a run"
                )))
            }
            Err(RouteError::Run(err)) => {
                Err(Error::execution_error()
                    .with_reason(format!("asking `{target}` failed: {err}")))
            }
        }
    }
}
