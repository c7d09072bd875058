use std::collections::HashMap;
use std::sync::Arc;

use parley_model::ModelProvider;
use tokio::sync::Mutex;

use super::{
    Agent, AgentId, AgentInner, ConfigError, EventSink, RunEvent,
};
use crate::conversation::Conversation;
use crate::directory::AgentDirectory;
use crate::model_client::ModelClient;
use crate::registry::ToolRegistry;
use crate::tool::{ROUTING_COMMAND, RoutingTool, Tool};

/// Default turn budget for one run.
pub const DEFAULT_MAX_TURNS: usize = 16;

/// Default routing depth budget.
pub const DEFAULT_MAX_ROUTING_DEPTH: usize = 4;

/// [`Agent`] builder.
///
/// A display name and a system prompt are required; building without
/// them fails with a [`ConfigError`]. The registry and the directory
/// default to fresh, empty ones; pass the shared instances to let the
/// agent see process-wide tools and peers.
pub struct AgentBuilder {
    model_client: ModelClient,
    name: Option<String>,
    system_prompt: Option<String>,
    registry: ToolRegistry,
    directory: AgentDirectory,
    sink: Option<EventSink>,
    local_tools: Vec<Arc<dyn Tool>>,
    max_turns: usize,
    max_routing_depth: usize,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            name: None,
            system_prompt: None,
            registry: ToolRegistry::new(),
            directory: AgentDirectory::new(),
            sink: None,
            local_tools: vec![],
            max_turns: DEFAULT_MAX_TURNS,
            max_routing_depth: DEFAULT_MAX_ROUTING_DEPTH,
        }
    }

    /// Sets the display name for the agent.
    #[inline]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Attaches the shared tool registry.
    #[inline]
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Attaches the shared agent directory.
    #[inline]
    pub fn with_directory(mut self, directory: AgentDirectory) -> Self {
        self.directory = directory;
        self
    }

    /// Attaches a callback to be invoked for every run event.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(RunEvent) + Send + Sync + 'static,
    ) -> Self {
        self.sink = Some(Arc::new(on_event));
        self
    }

    /// Registers an instance-local command, available to this agent
    /// without a registry entry.
    #[inline]
    pub fn with_local_tool<T: Tool>(mut self, tool: T) -> Self {
        self.local_tools.push(Arc::new(tool));
        self
    }

    /// Caps the number of turns a single run may take.
    #[inline]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Caps the depth of nested routed runs this agent may cause.
    #[inline]
    pub fn with_max_routing_depth(mut self, max_depth: usize) -> Self {
        self.max_routing_depth = max_depth;
        self
    }

    /// Builds the agent and registers it in the directory.
    pub fn build(self) -> Result<Agent, ConfigError> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingName)?;
        let prompt = self
            .system_prompt
            .filter(|prompt| !prompt.is_empty())
            .ok_or(ConfigError::MissingSystemPrompt)?;

        let id = AgentId::mint();
        // Append the identifier so the model can self-reference it in
        // routed messages.
        let prompt = format!("{prompt}\n\nYour agent id is {id}.");

        let mut local_tools: HashMap<String, Arc<dyn Tool>> = self
            .local_tools
            .into_iter()
            .map(|tool| (tool.name().to_owned(), tool))
            .collect();
        local_tools.entry(ROUTING_COMMAND.to_owned()).or_insert_with(
            || {
                Arc::new(RoutingTool::new(
                    self.directory.clone(),
                    self.max_routing_depth,
                ))
            },
        );

        // Permission lists authored with the display name must keep
        // working when the engine presents the identifier.
        self.registry.register_alias(id.as_str(), name.as_str());

        info!(name, %id, "built agent");
        let agent = Agent {
            id,
            name: name.clone().into(),
            inner: Arc::new(Mutex::new(AgentInner {
                model_client: self.model_client,
                conversation: Conversation::with_system_prompt(prompt),
                registry: self.registry,
                local_tools,
                sink: self.sink,
                max_turns: self.max_turns,
            })),
        };
        if !self.directory.insert(&agent) {
            return Err(ConfigError::DuplicateName(name));
        }
        Ok(agent)
    }
}
