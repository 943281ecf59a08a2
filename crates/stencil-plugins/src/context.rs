//! Host and plugin context types.
//!
//! [`HostContext`] is what the host CLI supplies to the loader.
//! [`PluginContext`] is the per-plugin view handed to `initialize`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::plugin::PluginId;

/// Severity of a plugin log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal progress.
    Info,
    /// Something odd but recoverable.
    Warn,
    /// Something failed.
    Error,
}

/// Destination for log lines emitted by plugins.
pub trait LogSink: Send + Sync {
    /// Record one message from `plugin_id`.
    fn log(&self, level: LogLevel, plugin_id: &str, message: &str);
}

/// Forwards plugin log lines to `tracing` with the plugin id attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, plugin_id: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "stencil::plugin", plugin_id, "{message}"),
            LogLevel::Info => tracing::info!(target: "stencil::plugin", plugin_id, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "stencil::plugin", plugin_id, "{message}"),
            LogLevel::Error => tracing::error!(target: "stencil::plugin", plugin_id, "{message}"),
        }
    }
}

/// Logger bound to one plugin.
#[derive(Clone)]
pub struct PluginLogger {
    plugin_id: PluginId,
    sink: Arc<dyn LogSink>,
}

impl PluginLogger {
    /// Bind a sink to a plugin id.
    #[must_use]
    pub fn new(plugin_id: PluginId, sink: Arc<dyn LogSink>) -> Self {
        Self { plugin_id, sink }
    }

    /// Log at debug level.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.sink.log(LogLevel::Debug, self.plugin_id.as_str(), message.as_ref());
    }

    /// Log at info level.
    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.log(LogLevel::Info, self.plugin_id.as_str(), message.as_ref());
    }

    /// Log at warn level.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.sink.log(LogLevel::Warn, self.plugin_id.as_str(), message.as_ref());
    }

    /// Log at error level.
    pub fn error(&self, message: impl AsRef<str>) {
        self.sink.log(LogLevel::Error, self.plugin_id.as_str(), message.as_ref());
    }
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// What the host provides to the loader.
#[derive(Clone)]
pub struct HostContext {
    /// Working directory; the security boundary for local plugin paths.
    pub working_dir: PathBuf,
    /// Log destination for plugin messages.
    pub log_sink: Arc<dyn LogSink>,
}

impl HostContext {
    /// Create a host context logging through `tracing`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            log_sink: Arc::new(TracingLogSink),
        }
    }

    /// Replace the log sink.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

/// Context handed to a plugin's `initialize` hook.
#[derive(Debug, Clone)]
pub struct PluginContext {
    plugin_id: PluginId,
    options: Map<String, Value>,
    working_dir: PathBuf,
    host_version: semver::Version,
    logger: PluginLogger,
    cancel: CancellationToken,
}

impl PluginContext {
    /// Build the context for one plugin.
    #[must_use]
    pub fn new(
        plugin_id: PluginId,
        options: Map<String, Value>,
        host: &HostContext,
        host_version: semver::Version,
    ) -> Self {
        Self {
            logger: PluginLogger::new(plugin_id.clone(), Arc::clone(&host.log_sink)),
            plugin_id,
            options,
            working_dir: host.working_dir.clone(),
            host_version,
            cancel: CancellationToken::new(),
        }
    }

    /// The plugin being initialized.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Free-form options from the plugin declaration.
    #[must_use]
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// A single option by key.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Host working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Version of the running host.
    #[must_use]
    pub fn host_version(&self) -> &semver::Version {
        &self.host_version
    }

    /// Logger scoped to this plugin.
    #[must_use]
    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Cancelled when the loader stops waiting for `initialize`.
    ///
    /// Hooks that spawn background work should watch this token; the hook
    /// future itself is dropped when the timeout fires.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
