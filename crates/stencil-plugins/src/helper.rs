//! Template helper namespace.
//!
//! [`HelperTable`] is the rendering engine's global helper table. It is
//! append-only: once a name is bound it stays bound for the life of the
//! process, so a conflict is always detected against the first owner.
//! [`HelperRegistrar`] validates plugin helper names and binds them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Owner, PluginId};

/// A helper callable from templates during rendering.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> PluginResult<Value> + Send + Sync>;

/// Wrap a closure as a [`HelperFn`].
pub fn helper_fn<F>(f: F) -> HelperFn
where
    F: Fn(&[Value]) -> PluginResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Whether `name` is an acceptable helper name.
///
/// Letters, digits, `_`, `-`, and the namespacing characters `:` and `.`
/// (e.g. `net:vnet.template`). Empty names are rejected.
#[must_use]
pub fn is_valid_helper_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
}

/// A bound helper and its owner.
#[derive(Clone)]
pub struct HelperBinding {
    /// Helper name as used in templates.
    pub name: String,
    /// The implementation.
    pub function: HelperFn,
    /// Who bound it.
    pub owner: Owner,
}

impl fmt::Debug for HelperBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperBinding")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Append-only helper table consumed by the rendering engine.
#[derive(Debug, Clone, Default)]
pub struct HelperTable {
    bindings: BTreeMap<String, HelperBinding>,
}

impl HelperTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host built-in helper.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidHelperName`] for a malformed name or
    /// [`PluginError::HelperConflict`] if the name is taken.
    pub fn with_builtin(
        mut self,
        name: impl Into<String>,
        function: HelperFn,
    ) -> PluginResult<Self> {
        let name = name.into();
        if !is_valid_helper_name(&name) {
            return Err(PluginError::InvalidHelperName {
                name,
                plugin_id: Owner::BuiltIn.to_string(),
            });
        }
        self.bind(HelperBinding {
            name,
            function,
            owner: Owner::BuiltIn,
        })?;
        Ok(self)
    }

    /// Bind a helper. Never overwrites.
    fn bind(&mut self, binding: HelperBinding) -> PluginResult<()> {
        if let Some(existing) = self.bindings.get(&binding.name) {
            return Err(PluginError::HelperConflict {
                name: binding.name,
                requested_by: binding.owner.to_string(),
                owner: existing.owner.to_string(),
            });
        }
        self.bindings.insert(binding.name.clone(), binding);
        Ok(())
    }

    /// Look up a helper by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HelperBinding> {
        self.bindings.get(name)
    }

    /// Invoke a helper by name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Hook`] if the helper is unknown, or whatever
    /// the helper itself returns.
    pub fn call(&self, name: &str, args: &[Value]) -> PluginResult<Value> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| PluginError::hook(format!("unknown helper: {name}")))?;
        (binding.function)(args)
    }

    /// All bindings, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &HelperBinding> {
        self.bindings.values()
    }

    /// Helper names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.bindings.keys().map(String::as_str).collect()
    }

    /// Number of bound helpers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Validates plugin helper names and binds them into the [`HelperTable`].
///
/// Helpers already present in the table when the registrar is created are
/// owned by `built-in`.
#[derive(Debug, Default)]
pub struct HelperRegistrar {
    table: HelperTable,
}

impl HelperRegistrar {
    /// Create a registrar over a table that may contain built-in helpers.
    #[must_use]
    pub fn new(table: HelperTable) -> Self {
        Self { table }
    }

    /// Register the helpers a plugin exposed from its `helpers()` hook.
    ///
    /// All names are checked before anything is bound, so a rejected plugin
    /// binds nothing. Returns the number of helpers bound.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidHelperName`] or
    /// [`PluginError::HelperConflict`] for the first offending name.
    pub fn register(
        &mut self,
        plugin_id: &PluginId,
        helpers: BTreeMap<String, HelperFn>,
    ) -> PluginResult<usize> {
        for name in helpers.keys() {
            if !is_valid_helper_name(name) {
                return Err(PluginError::InvalidHelperName {
                    name: name.clone(),
                    plugin_id: plugin_id.to_string(),
                });
            }
            if let Some(existing) = self.table.get(name) {
                return Err(PluginError::HelperConflict {
                    name: name.clone(),
                    requested_by: plugin_id.to_string(),
                    owner: existing.owner.to_string(),
                });
            }
        }

        let count = helpers.len();
        for (name, function) in helpers {
            debug!(plugin_id = %plugin_id, helper = %name, "Bound template helper");
            self.table.bind(HelperBinding {
                name,
                function,
                owner: Owner::Plugin(plugin_id.clone()),
            })?;
        }
        Ok(count)
    }

    /// Look up a bound helper.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HelperBinding> {
        self.table.get(name)
    }

    /// Every bound helper, built-ins included, sorted by name.
    #[must_use]
    pub fn all_helpers(&self) -> Vec<&HelperBinding> {
        self.table.iter().collect()
    }

    /// Owner of a helper name, if bound.
    #[must_use]
    pub fn owner(&self, name: &str) -> Option<&Owner> {
        self.table.get(name).map(|b| &b.owner)
    }

    /// The underlying helper table.
    #[must_use]
    pub fn table(&self) -> &HelperTable {
        &self.table
    }

    /// Names of built-in helpers.
    #[must_use]
    pub fn builtin_names(&self) -> Vec<&str> {
        self.table
            .iter()
            .filter(|b| b.owner == Owner::BuiltIn)
            .map(|b| b.name.as_str())
            .collect()
    }
}
