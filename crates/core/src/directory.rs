//! The shared directory of live agents.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::agent::Agent;

/// Maps display names and identifiers to live agents, for routing.
///
/// Cheap to clone; clones share the same table. Entries are added when
/// an agent is built and never removed, since agents live for the
/// whole process.
#[derive(Clone, Default)]
pub struct AgentDirectory {
    inner: Arc<RwLock<HashMap<String, Agent>>>,
}

impl AgentDirectory {
    /// Creates an empty directory.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent under both its display name and its
    /// identifier. Returns `false` when the display name is taken.
    pub(crate) fn insert(&self, agent: &Agent) -> bool {
        let mut inner = self.write();
        if inner.contains_key(agent.name()) {
            return false;
        }
        inner.insert(agent.name().to_owned(), agent.clone());
        inner.insert(agent.id().to_string(), agent.clone());
        true
    }

    /// Resolves a display name or an identifier to a live agent.
    pub fn get(&self, key: &str) -> Option<Agent> {
        self.read().get(key).cloned()
    }

    /// The display names of all registered agents, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.read();
        let mut names: Vec<String> = inner
            .values()
            .map(|agent| agent.name().to_owned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Agent>> {
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Agent>> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }
}
