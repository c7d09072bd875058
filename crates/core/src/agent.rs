mod builder;
mod engine;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_model::{ModelProviderError, UsageSummary};
use tokio::sync::Mutex;

use crate::conversation::Conversation;
use crate::model_client::ModelClient;
use crate::registry::ToolRegistry;
use crate::tool::Tool;
pub use builder::AgentBuilder;

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique, immutable agent identifier.
///
/// Identifiers are opaque: nothing should be read out of them except
/// equality. Permission lists and routing targets may use either an
/// identifier or a display name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AgentId(Arc<str>);

impl AgentId {
    fn mint() -> Self {
        let n = NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed);
        AgentId(format!("agent:{n}").into())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event emitted to the run sink while a run progresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    /// A streamed content fragment, in arrival order.
    Fragment(String),
    /// A command is about to be executed, named by its tag.
    ToolInvocation(String),
    /// The endpoint reported its token usage for one request. This is
    /// side-channel information and never enters the history.
    Usage(UsageSummary),
    /// The completion command ended the run, with an optional report.
    Completed(Option<String>),
}

/// How a run terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model produced a final text without any commands.
    Finished(String),
    /// The model issued the completion command, with an optional
    /// report. Only the run ends; the process keeps going.
    Completed(Option<String>),
    /// The turn budget ran out while the model kept calling tools.
    BudgetExceeded,
}

impl RunOutcome {
    /// The final text of the run, however it terminated.
    pub fn into_text(self) -> String {
        match self {
            RunOutcome::Finished(text) => text,
            RunOutcome::Completed(report) => report.unwrap_or_default(),
            RunOutcome::BudgetExceeded => String::new(),
        }
    }
}

/// A fatal run failure.
///
/// Everything a tool or the dispatcher can get wrong is fed back into
/// the conversation instead; only endpoint failures abort a run.
#[derive(Debug)]
pub enum RunError {
    /// The endpoint call failed. The engine does not retry.
    Provider(Box<dyn ModelProviderError>),
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Provider(err) => {
                write!(f, "endpoint request failed: {err}")
            }
        }
    }
}

impl StdError for RunError {}

/// Why a routed call could not produce an outcome.
pub(crate) enum RouteError {
    /// The target is already handling a run.
    Busy,
    /// The target's run failed.
    Run(RunError),
}

/// Errors reported when building an agent. Construction fails fast on
/// an incomplete configuration, before any run can start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No display name was configured.
    MissingName,
    /// No system prompt was configured.
    MissingSystemPrompt,
    /// The display name is already taken in the directory.
    DuplicateName(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingName => {
                write!(f, "agent has no display name")
            }
            ConfigError::MissingSystemPrompt => {
                write!(f, "agent has no system prompt")
            }
            ConfigError::DuplicateName(name) => {
                write!(f, "an agent named `{name}` already exists")
            }
        }
    }
}

impl StdError for ConfigError {}

pub(crate) type EventSink = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// An agent: an identity, an endpoint configuration and a conversation
/// history, driven by the turn loop of [`Agent::run`].
///
/// `Agent` is a cheap-to-clone handle; clones share the same state. At
/// most one run can be in flight per agent: concurrent `run` calls
/// serialize, and routed calls from peers report the agent as busy
/// instead of waiting.
#[derive(Clone)]
pub struct Agent {
    id: AgentId,
    name: Arc<str>,
    inner: Arc<Mutex<AgentInner>>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct AgentInner {
    model_client: ModelClient,
    conversation: Conversation,
    registry: ToolRegistry,
    local_tools: HashMap<String, Arc<dyn Tool>>,
    sink: Option<EventSink>,
    max_turns: usize,
}

impl Agent {
    /// The identifier of this agent.
    #[inline]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// The display name of this agent.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the conversation loop with the given user input until it
    /// terminates, and returns how it terminated.
    ///
    /// Incremental output is delivered through the sink configured at
    /// build time. The call blocks for the whole run: every endpoint
    /// request, command execution and routed peer run happens on this
    /// call stack.
    pub async fn run(
        &self,
        input: impl Into<String>,
    ) -> Result<RunOutcome, RunError> {
        let mut inner = self.inner.lock().await;
        inner.run_loop(&self.id, &self.name, input.into(), 0).await
    }

    /// Returns a snapshot of the conversation history.
    pub async fn history(&self) -> Conversation {
        self.inner.lock().await.conversation.clone()
    }

    /// Runs this agent on behalf of a peer. Unlike [`Agent::run`], a
    /// busy agent is reported instead of waited on, so routing cycles
    /// cannot deadlock.
    pub(crate) async fn route(
        &self,
        message: String,
        depth: usize,
    ) -> Result<RunOutcome, RouteError> {
        let Ok(mut inner) = self.inner.try_lock() else {
            return Err(RouteError::Busy);
        };
        inner
            .run_loop(&self.id, &self.name, message, depth)
            .await
            .map_err(RouteError::Run)
    }
}
