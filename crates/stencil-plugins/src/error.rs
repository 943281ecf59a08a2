//! Plugin error types.

use std::path::PathBuf;
use std::time::Duration;

/// Errors from plugin operations.
///
/// Every variant except [`PluginError::LoaderContract`] is scoped to a single
/// plugin declaration: the loader records it and moves on to the next one.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin code could not be located.
    #[error("cannot resolve plugin '{reference}': {message}")]
    ModuleResolution {
        /// The package reference from the declaration.
        reference: String,
        /// Why resolution failed.
        message: String,
    },

    /// A local plugin path escapes the working directory.
    #[error("security violation: plugin path '{reference}' resolves to {} which is outside the working directory {}", .resolved.display(), .root.display())]
    SecurityPathViolation {
        /// The package reference from the declaration.
        reference: String,
        /// The normalized absolute path.
        resolved: PathBuf,
        /// The working directory acting as the boundary.
        root: PathBuf,
    },

    /// The loaded module does not export a plugin object or constructor.
    #[error("invalid plugin export in '{reference}': {message}")]
    InvalidPluginExport {
        /// The package reference from the declaration.
        reference: String,
        /// What was exported instead.
        message: String,
    },

    /// Plugin metadata is missing a field or has a malformed one.
    #[error("invalid plugin metadata: field '{field}' {message}")]
    MetadataValidation {
        /// The offending metadata field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A plugin with this ID is already registered.
    #[error("plugin already registered: {id}")]
    DuplicatePlugin {
        /// The duplicated plugin id.
        id: String,
    },

    /// A template type is already owned by another plugin or a built-in.
    #[error("template type '{template_type}' requested by plugin '{requested_by}' is already owned by '{owner}'")]
    TemplateConflict {
        /// The contested template type.
        template_type: String,
        /// The plugin attempting the registration.
        requested_by: String,
        /// The current owner.
        owner: String,
    },

    /// A helper name is empty or contains disallowed characters.
    #[error("invalid helper name '{name}' from plugin '{plugin_id}': must match [a-zA-Z0-9_:.-]+")]
    InvalidHelperName {
        /// The rejected name.
        name: String,
        /// The plugin contributing it.
        plugin_id: String,
    },

    /// A helper name is already owned by another plugin or a built-in.
    #[error("helper '{name}' requested by plugin '{requested_by}' is already owned by '{owner}'")]
    HelperConflict {
        /// The contested helper name.
        name: String,
        /// The plugin attempting the registration.
        requested_by: String,
        /// The current owner.
        owner: String,
    },

    /// A command name or alias is already owned by another plugin or a built-in.
    #[error("{kind} '{name}' requested by plugin '{requested_by}' is already owned by '{owner}'")]
    CommandConflict {
        /// `"command"` or `"alias"`.
        kind: &'static str,
        /// The contested name.
        name: String,
        /// The plugin attempting the registration.
        requested_by: String,
        /// The current owner.
        owner: String,
    },

    /// The plugin's `initialize` hook did not settle in time.
    #[error("plugin '{plugin_id}' initialization timed out after {}ms", .timeout.as_millis())]
    InitializationTimeout {
        /// The plugin being initialized.
        plugin_id: String,
        /// The configured threshold.
        timeout: Duration,
    },

    /// The plugin's `initialize` hook failed or panicked.
    #[error("plugin '{plugin_id}' initialization failed: {message}")]
    Initialization {
        /// The plugin being initialized.
        plugin_id: String,
        /// Failure reason.
        message: String,
    },

    /// The plugin's `cleanup` hook did not settle in time. Warning only.
    #[error("plugin '{plugin_id}' cleanup timed out after {}ms", .timeout.as_millis())]
    CleanupTimeout {
        /// The plugin being cleaned up.
        plugin_id: String,
        /// The configured threshold.
        timeout: Duration,
    },

    /// The plugin's `cleanup` hook failed or panicked. Warning only.
    #[error("plugin '{plugin_id}' cleanup failed: {message}")]
    Cleanup {
        /// The plugin being cleaned up.
        plugin_id: String,
        /// Failure reason.
        message: String,
    },

    /// Error raised by plugin code from one of its hooks.
    #[error("{0}")]
    Hook(String),

    /// A plugin-contributed command handler failed.
    #[error("command '{command}' failed: {message}")]
    CommandFailed {
        /// The command that was run.
        command: String,
        /// Failure reason.
        message: String,
    },

    /// A synchronous plugin hook panicked.
    #[error("plugin '{plugin}' panicked in {hook}(): {message}")]
    Panicked {
        /// Plugin id, or the package reference before an id is known.
        plugin: String,
        /// The hook that panicked.
        hook: &'static str,
        /// Panic payload.
        message: String,
    },

    /// The loader itself was misused by the host.
    #[error("plugin loader contract violation: {0}")]
    LoaderContract(String),
}

impl PluginError {
    /// Build a [`PluginError::Hook`] from plugin code.
    #[must_use]
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Whether this error is a naming conflict with an existing owner.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePlugin { .. }
                | Self::TemplateConflict { .. }
                | Self::HelperConflict { .. }
                | Self::CommandConflict { .. }
        )
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_messages_name_both_parties() {
        let err = PluginError::TemplateConflict {
            template_type: "alpha".into(),
            requested_by: "b".into(),
            owner: "a".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpha"));
        assert!(msg.contains("'b'"));
        assert!(msg.contains("'a'"));
        assert!(err.is_conflict());
    }

    #[test]
    fn timeout_message_reports_threshold() {
        let err = PluginError::InitializationTimeout {
            plugin_id: "slow".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "plugin 'slow' initialization timed out after 5000ms"
        );
        assert!(!err.is_conflict());
    }
}
