//! Plugin trait and core types.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::CommandTree;
use crate::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::helper::HelperFn;
use crate::template::TemplateMetadata;

/// Unique, stable plugin identifier.
///
/// Plugin IDs are strings like `"azure-network"` or `"core_helpers"`. They
/// must be non-empty and contain only ASCII letters, digits, underscores and
/// hyphens. The id is what every conflict error names for attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PluginId(String);

/// Deserialize with validation.
impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PluginId {
    /// Create a new `PluginId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MetadataValidation`] if the ID is empty or
    /// contains invalid characters.
    pub fn new(id: impl Into<String>) -> PluginResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a `PluginId` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid plugin ID without constructing one.
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        Self::validate(id).is_ok()
    }

    fn validate(id: &str) -> PluginResult<()> {
        if id.is_empty() {
            return Err(PluginError::MetadataValidation {
                field: "id",
                message: "must not be empty".into(),
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PluginError::MetadataValidation {
                field: "id",
                message: format!("must match [a-zA-Z0-9_-]+, got: {id}"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Descriptive metadata every plugin carries.
///
/// Fields are plain strings because the plugin supplies them; the loader
/// validates them (see [`PluginMetadata::validate`]) before any registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique identifier, `[a-zA-Z0-9_-]+`.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Plugin version string.
    pub version: String,
    /// Optional author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Optional semver requirement on the host version (e.g. `">=0.1, <0.3"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_host_version: Option<String>,
}

impl PluginMetadata {
    /// Create metadata with the required fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Require a host version range.
    #[must_use]
    pub fn requires_host(mut self, requirement: impl Into<String>) -> Self {
        self.required_host_version = Some(requirement.into());
        self
    }

    /// Validate the metadata against the host version and return the parsed id.
    ///
    /// Checks, in order: `id` present, `id` well-formed, `name` present,
    /// `version` present, and `required_host_version` (when set) parses as a
    /// semver requirement that `host_version` satisfies.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MetadataValidation`] naming the first offending field.
    pub fn validate(&self, host_version: &semver::Version) -> PluginResult<PluginId> {
        if self.id.trim().is_empty() {
            return Err(missing("id"));
        }
        let id = PluginId::new(self.id.clone())?;
        if self.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if self.version.trim().is_empty() {
            return Err(missing("version"));
        }
        if let Some(requirement) = &self.required_host_version {
            let req = semver::VersionReq::parse(requirement).map_err(|e| {
                PluginError::MetadataValidation {
                    field: "required_host_version",
                    message: format!("is not a valid version requirement ({requirement}): {e}"),
                }
            })?;
            if !req.matches(host_version) {
                return Err(PluginError::MetadataValidation {
                    field: "required_host_version",
                    message: format!("requires host {requirement}, running {host_version}"),
                });
            }
        }
        Ok(id)
    }
}

fn missing(field: &'static str) -> PluginError {
    PluginError::MetadataValidation {
        field,
        message: "is required and must not be empty".into(),
    }
}

/// Who owns a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Present in the host before any plugin loaded.
    BuiltIn,
    /// Contributed by a plugin.
    Plugin(PluginId),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("built-in"),
            Self::Plugin(id) => f.write_str(id.as_str()),
        }
    }
}

/// The lifecycle state of a plugin declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Read from configuration, nothing done yet.
    Declared,
    /// Plugin code located.
    Resolved,
    /// Plugin object constructed.
    Instantiated,
    /// Metadata passed validation.
    MetadataValid,
    /// Templates and helper names claimed in the extension registry.
    Registered,
    /// `initialize` hook running.
    Initializing,
    /// Fully loaded; contributions are live.
    Active,
    /// `cleanup` hook running.
    CleaningUp,
    /// Cleanup attempted; the plugin is done.
    Terminated,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Resolved => "resolved",
            Self::Instantiated => "instantiated",
            Self::MetadataValid => "metadata-valid",
            Self::Registered => "registered",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::CleaningUp => "cleaning-up",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl fmt::Debug for dyn ExtensionPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPlugin")
            .field("id", &self.metadata().id)
            .field("version", &self.metadata().version)
            .finish_non_exhaustive()
    }
}

/// An extension contributing template types, helpers and commands.
///
/// Only [`metadata`](Self::metadata) is required. Hooks are called by the
/// loader in a fixed order: `templates`/`helpers` (registry claim),
/// `initialize`, `helpers` again (binding), `register_commands`. `cleanup`
/// runs at process shutdown for plugins that reached the active state.
#[async_trait]
pub trait ExtensionPlugin: Send + Sync {
    /// Identity and version information.
    fn metadata(&self) -> &PluginMetadata;

    /// Prepare the plugin. Raced against the loader's init timeout; the
    /// future is dropped and `ctx.cancellation()` is cancelled if it loses.
    async fn initialize(&self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Template types this plugin provides.
    fn templates(&self) -> Vec<TemplateMetadata> {
        Vec::new()
    }

    /// Template helpers this plugin provides, keyed by helper name.
    fn helpers(&self) -> BTreeMap<String, HelperFn> {
        BTreeMap::new()
    }

    /// Whether [`register_commands`](Self::register_commands) should be invoked.
    fn registers_commands(&self) -> bool {
        false
    }

    /// Attach subcommands to the host command tree.
    fn register_commands(&self, _tree: &mut CommandTree) -> PluginResult<()> {
        Ok(())
    }

    /// Release resources at shutdown. Raced against the cleanup timeout.
    async fn cleanup(&self) -> PluginResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> semver::Version {
        semver::Version::new(0, 4, 2)
    }

    #[test]
    fn test_valid_plugin_ids() {
        assert!(PluginId::new("my-plugin").is_ok());
        assert!(PluginId::new("Azure_Network").is_ok());
        assert!(PluginId::new("plugin123").is_ok());
        assert!(PluginId::new("-leading").is_ok());
    }

    #[test]
    fn test_invalid_plugin_ids() {
        assert!(PluginId::new("").is_err());
        assert!(PluginId::new("my plugin").is_err());
        assert!(PluginId::new("net:vnet").is_err());
        assert!(PluginId::new("../escape").is_err());
        assert!(PluginId::new("plugin@1").is_err());
    }

    #[test]
    fn test_plugin_id_serde_rejects_malformed() {
        let id: PluginId = serde_json::from_str("\"ok-id\"").unwrap();
        assert_eq!(id.as_str(), "ok-id");
        assert!(serde_json::from_str::<PluginId>("\"bad id\"").is_err());
    }

    #[test]
    fn metadata_validation_names_field() {
        let meta = PluginMetadata::new("a", "", "1.0.0");
        let err = meta.validate(&host()).unwrap_err();
        assert!(matches!(
            err,
            PluginError::MetadataValidation { field: "name", .. }
        ));

        let meta = PluginMetadata::new("", "A", "1.0.0");
        assert!(matches!(
            meta.validate(&host()).unwrap_err(),
            PluginError::MetadataValidation { field: "id", .. }
        ));

        let meta = PluginMetadata::new("a b", "A", "1.0.0");
        assert!(matches!(
            meta.validate(&host()).unwrap_err(),
            PluginError::MetadataValidation { field: "id", .. }
        ));

        let meta = PluginMetadata::new("a", "A", " ");
        assert!(matches!(
            meta.validate(&host()).unwrap_err(),
            PluginError::MetadataValidation {
                field: "version",
                ..
            }
        ));
    }

    #[test]
    fn metadata_host_version_requirement() {
        let ok = PluginMetadata::new("a", "A", "1.0.0").requires_host(">=0.4, <0.5");
        assert_eq!(ok.validate(&host()).unwrap().as_str(), "a");

        let too_new = PluginMetadata::new("a", "A", "1.0.0").requires_host("^1.0");
        assert!(matches!(
            too_new.validate(&host()).unwrap_err(),
            PluginError::MetadataValidation {
                field: "required_host_version",
                ..
            }
        ));

        let garbage = PluginMetadata::new("a", "A", "1.0.0").requires_host("whenever");
        assert!(garbage.validate(&host()).is_err());
    }

    #[test]
    fn owner_display() {
        assert_eq!(Owner::BuiltIn.to_string(), "built-in");
        assert_eq!(Owner::Plugin(PluginId::from_static("a")).to_string(), "a");
    }
}
