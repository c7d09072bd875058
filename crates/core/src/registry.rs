//! Tool registration, permission checks and identity aliasing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::markup::CommandBlock;
use crate::tool::{Tool, ToolCall, ToolResult};

/// How many similar names an unknown-command suggestion may carry.
const MAX_SUGGESTIONS: usize = 3;

/// Who may invoke a tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Permission {
    /// Every agent may invoke the tool.
    Unrestricted,
    /// Only the named agents may invoke the tool. Members are display
    /// names; callers presenting an identifier are resolved through the
    /// alias table first.
    Agents(HashSet<String>),
}

impl Permission {
    /// Builds an allow-list permission from display names.
    pub fn agents<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Permission::Agents(names.into_iter().map(Into::into).collect())
    }
}

/// A single tool registration.
#[derive(Clone)]
pub struct Registration {
    tool: Arc<dyn Tool>,
    permission: Permission,
    description: String,
}

impl Registration {
    /// The registered executable.
    #[inline]
    pub fn tool(&self) -> Arc<dyn Tool> {
        Arc::clone(&self.tool)
    }

    /// Who may invoke the tool.
    #[inline]
    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    /// The human-readable description of the tool.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// The shared, process-wide tool directory.
///
/// Cheap to clone; clones share the same tables. Registrations should
/// be made before any run starts; reads happen on every turn of every
/// agent. The alias table keeps growing as agents are constructed so
/// permission lists authored with display names keep working when a
/// caller presents its opaque identifier.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    tools: HashMap<String, Registration>,
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its own name. The last registration for a
    /// name wins.
    pub fn register<T: Tool>(&self, tool: T, permission: Permission) {
        let name = tool.name().to_owned();
        let description = tool.description().to_owned();
        debug!(name, "registering tool");
        self.write().tools.insert(
            name,
            Registration {
                tool: Arc::new(tool),
                permission,
                description,
            },
        );
    }

    /// Registers a plain closure as a tool. The closure receives the
    /// raw command block and parses its own fields from it.
    pub fn register_fn<N, D, F>(
        &self,
        name: N,
        description: D,
        permission: Permission,
        f: F,
    ) where
        N: Into<String>,
        D: Into<String>,
        F: Fn(&CommandBlock) -> ToolResult + Send + Sync + 'static,
    {
        self.register(
            FnTool {
                name: name.into(),
                description: description.into(),
                f,
            },
            permission,
        );
    }

    /// Records that `id` should be treated as `name` for permission
    /// purposes. Re-registration overwrites.
    pub fn register_alias<I, N>(&self, id: I, name: N)
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.write().aliases.insert(id.into(), name.into());
    }

    /// Looks up a registration by tool name.
    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.read().tools.get(name).cloned()
    }

    /// Returns whether `caller` may invoke `tool_name`. Unknown tools
    /// are never permitted.
    pub fn check_permission(&self, caller: &str, tool_name: &str) -> bool {
        let inner = self.read();
        let Some(registration) = inner.tools.get(tool_name) else {
            return false;
        };
        match &registration.permission {
            Permission::Unrestricted => true,
            Permission::Agents(names) => {
                names.contains(inner.resolve(caller))
            }
        }
    }

    /// All tool names `caller` may invoke, sorted.
    pub fn list_permitted(&self, caller: &str) -> Vec<String> {
        let inner = self.read();
        let caller = inner.resolve(caller);
        let mut names: Vec<String> = inner
            .tools
            .iter()
            .filter(|(_, registration)| match &registration.permission {
                Permission::Unrestricted => true,
                Permission::Agents(names) => names.contains(caller),
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Permitted tool names similar to `wanted`, for actionable
    /// unknown-command feedback. Capped at a small number.
    pub fn suggest(&self, caller: &str, wanted: &str) -> Vec<String> {
        let mut names = self.list_permitted(caller);
        names.retain(|name| name.contains(wanted) || wanted.contains(name));
        names.truncate(MAX_SUGGESTIONS);
        names
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl RegistryInner {
    /// Substitutes a known identifier with its display name; an
    /// unknown caller is used unchanged.
    fn resolve<'a>(&'a self, caller: &'a str) -> &'a str {
        self.aliases.get(caller).map(String::as_str).unwrap_or(caller)
    }
}

struct FnTool<F> {
    name: String,
    description: String,
    f: F,
}

#[async_trait::async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&CommandBlock) -> ToolResult + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, call: ToolCall) -> ToolResult {
        (self.f)(&call.block)
    }
}
