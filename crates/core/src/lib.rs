//! Core logic including the conversation engine, command extraction,
//! the tool registry and inter-agent routing.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod directory;
pub mod markup;
mod model_client;
pub mod registry;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentId, ConfigError, RunError, RunEvent, RunOutcome,
};
pub use directory::AgentDirectory;
pub use registry::{Permission, ToolRegistry};
