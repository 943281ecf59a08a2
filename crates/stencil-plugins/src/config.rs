//! Loader configuration and plugin declarations.
//!
//! Both are plain serde types so the host can embed them in its own config
//! file (`[loader]` and `[[plugins]]` in `stencil.toml`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PluginError, PluginResult};
use crate::resolver::DEFAULT_INSTALL_COMMAND;

/// Version of this crate, used as the default host version.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// PluginDeclaration
// ---------------------------------------------------------------------------

/// One entry of the host's plugin list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    /// Package name or local path (`./plugins/net`).
    #[serde(rename = "package", alias = "packageReference")]
    pub package_reference: String,
    /// Disabled declarations are skipped without any resolution.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form options handed to the plugin's `initialize` hook.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl PluginDeclaration {
    /// An enabled declaration with no options.
    #[must_use]
    pub fn new(package_reference: impl Into<String>) -> Self {
        Self {
            package_reference: package_reference.into(),
            enabled: true,
            options: Map::new(),
        }
    }

    /// Set `enabled`.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add one option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LoaderConfig
// ---------------------------------------------------------------------------

/// Tunables for [`PluginLoader`](crate::PluginLoader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How long a plugin's `initialize` hook may run, in milliseconds.
    pub init_timeout_ms: u64,
    /// How long a plugin's `cleanup` hook may run, in milliseconds.
    pub cleanup_timeout_ms: u64,
    /// Host version checked against `required_host_version`.
    pub host_version: String,
    /// Extra package search directories, searched after the defaults.
    pub plugin_dirs: Vec<PathBuf>,
    /// Install hint for missing packages; `{name}` is substituted.
    pub install_command: String,
    /// Run cleanup on SIGINT/SIGTERM before exiting.
    pub install_signal_handlers: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 5_000,
            cleanup_timeout_ms: 2_000,
            host_version: HOST_VERSION.to_string(),
            plugin_dirs: Vec::new(),
            install_command: DEFAULT_INSTALL_COMMAND.to_string(),
            install_signal_handlers: true,
        }
    }
}

impl LoaderConfig {
    /// Initialization timeout.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Cleanup timeout.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    /// Parsed host version.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoaderContract`] if `host_version` is not semver.
    pub fn parsed_host_version(&self) -> PluginResult<semver::Version> {
        semver::Version::parse(&self.host_version).map_err(|e| {
            PluginError::LoaderContract(format!(
                "host_version '{}' is not a valid semver version: {e}",
                self.host_version
            ))
        })
    }
}
