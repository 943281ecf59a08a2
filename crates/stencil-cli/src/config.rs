//! `stencil.toml` loading.
//!
//! The file has three parts, all optional:
//!
//! ```toml
//! [[plugins]]
//! package = "./plugins/net"
//! options = { region = "westeurope" }
//!
//! [loader]
//! init_timeout_ms = 10000
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stencil_plugins::{LoaderConfig, PluginDeclaration};
use stencil_telemetry::LogConfig;

/// Config file looked up in the working directory when `--config` is absent.
pub(crate) const CONFIG_FILE_NAME: &str = "stencil.toml";

/// Package name of the plugin compiled into the binary.
pub(crate) const CORE_PACKAGE: &str = "stencil-core";

/// Parsed `stencil.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StencilConfig {
    /// Plugin declarations, loaded in order.
    pub(crate) plugins: Vec<PluginDeclaration>,
    /// Loader tuning.
    pub(crate) loader: LoaderConfig,
    /// Logging setup.
    pub(crate) logging: LogConfig,
}

impl Default for StencilConfig {
    fn default() -> Self {
        Self {
            plugins: vec![PluginDeclaration::new(CORE_PACKAGE)],
            loader: LoaderConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// A loaded config and the file it came from, if any.
#[derive(Debug, Clone)]
pub(crate) struct LoadedConfig {
    pub(crate) config: StencilConfig,
    pub(crate) path: Option<PathBuf>,
}

impl StencilConfig {
    /// Parse TOML text.
    pub(crate) fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid stencil.toml")
    }

    /// Load from `explicit`, or from `stencil.toml` in `working_dir`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    pub(crate) fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<LoadedConfig> {
        let (path, required) = match explicit {
            Some(path) => (working_dir.join(path), true),
            None => (working_dir.join(CONFIG_FILE_NAME), false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(LoadedConfig {
                config: Self::default(),
                path: None,
            });
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml(&text).with_context(|| format!("in {}", path.display()))?;
        Ok(LoadedConfig {
            config,
            path: Some(path),
        })
    }
}
