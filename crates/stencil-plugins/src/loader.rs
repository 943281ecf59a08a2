//! The plugin loader.
//!
//! Drives each declaration through resolution, instantiation, metadata
//! validation, registration and initialization, strictly one at a time and
//! in declaration order. A failing declaration is recorded and skipped; it
//! never aborts the load of the others.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{CommandRegistrar, CommandTree};
use crate::config::{LoaderConfig, PluginDeclaration};
use crate::context::{HostContext, PluginContext};
use crate::error::{PluginError, PluginResult};
use crate::helper::{HelperBinding, HelperRegistrar, HelperTable};
use crate::module::{ModuleLoader, StaticModuleLoader};
use crate::plugin::{ExtensionPlugin, PluginId, PluginState};
use crate::registry::{Contributions, ExtensionRegistry, RegisteredTemplate};
use crate::resolver::{DefaultResolver, ModuleResolver, ResolvedModule, default_plugin_dirs};
use crate::shutdown::{CleanupHandle, CleanupReport, contain_async, contain_hook, panic_message};
use crate::template::TemplateMetadata;

/// A declaration that did not reach the active state.
#[derive(Debug)]
pub struct LoadFailure {
    /// Package reference from the declaration.
    pub reference: String,
    /// Last state the plugin reached before failing.
    pub stage: PluginState,
    /// What went wrong.
    pub error: PluginError,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (after {})", self.reference, self.error, self.stage)
    }
}

/// Result of [`PluginLoader::load_plugins_from_config`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Plugins that reached the active state, in load order.
    pub loaded: Vec<PluginId>,
    /// Declarations that failed, in declaration order.
    pub failures: Vec<LoadFailure>,
    /// Disabled declarations.
    pub skipped: usize,
    /// Enabled declarations attempted.
    pub total: usize,
}

impl LoadReport {
    /// `"N/M plugins loaded"`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}/{} plugins loaded", self.loaded.len(), self.total)
    }

    /// Whether every enabled declaration loaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Loads plugins and owns the registries they populate.
pub struct PluginLoader {
    config: LoaderConfig,
    host_version: semver::Version,
    resolver: Box<dyn ModuleResolver>,
    modules: Box<dyn ModuleLoader>,
    registry: ExtensionRegistry,
    helpers: HelperRegistrar,
    commands: CommandRegistrar,
    cleanup: CleanupHandle,
    loaded_once: bool,
}

impl PluginLoader {
    /// Create a loader with the default resolver and an empty static module table.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoaderContract`] if `config.host_version` is not semver.
    pub fn new(config: LoaderConfig) -> PluginResult<Self> {
        let host_version = config.parsed_host_version()?;
        let mut search_dirs = default_plugin_dirs();
        search_dirs.extend(config.plugin_dirs.iter().cloned());
        let resolver = DefaultResolver::with_search_dirs(search_dirs)
            .with_install_command(config.install_command.clone());

        Ok(Self {
            cleanup: CleanupHandle::new(config.cleanup_timeout()),
            config,
            host_version,
            resolver: Box::new(resolver),
            modules: Box::new(StaticModuleLoader::new()),
            registry: ExtensionRegistry::new(),
            helpers: HelperRegistrar::default(),
            commands: CommandRegistrar::new(),
            loaded_once: false,
        })
    }

    /// Replace the module resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Replace the module loader.
    #[must_use]
    pub fn with_module_loader(mut self, modules: impl ModuleLoader + 'static) -> Self {
        self.modules = Box::new(modules);
        self
    }

    /// Seed the helper table. Its entries become `built-in` and are reserved
    /// in the extension registry.
    #[must_use]
    pub fn with_helper_table(mut self, table: HelperTable) -> Self {
        for name in table.names() {
            self.registry.reserve_builtin_helper(name);
        }
        self.helpers = HelperRegistrar::new(table);
        self
    }

    /// Add a host template type.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::TemplateConflict`] if the type is already present.
    pub fn with_builtin_template(mut self, metadata: TemplateMetadata) -> PluginResult<Self> {
        self.registry.register_builtin_template(metadata)?;
        Ok(self)
    }

    /// Load every declaration in order.
    ///
    /// Built-in commands in `tree` are snapshotted first; plugins then append
    /// to it. Per-declaration failures are collected in the report.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoaderContract`] if called more than once.
    pub async fn load_plugins_from_config(
        &mut self,
        declarations: &[PluginDeclaration],
        host: &HostContext,
        tree: &mut CommandTree,
    ) -> PluginResult<LoadReport> {
        if self.loaded_once {
            return Err(PluginError::LoaderContract(
                "load_plugins_from_config may only be called once per loader".into(),
            ));
        }
        self.loaded_once = true;
        self.commands.initialize(tree)?;

        let mut report = LoadReport::default();
        for declaration in declarations {
            let reference = declaration.package_reference.as_str();
            if !declaration.enabled {
                debug!(reference, "Skipping disabled plugin");
                report.skipped = report.skipped.saturating_add(1);
                continue;
            }
            report.total = report.total.saturating_add(1);

            match self.load_one(declaration, host, tree).await {
                Ok(id) => {
                    info!(plugin_id = %id, reference, "Plugin active");
                    if report.loaded.is_empty() && self.config.install_signal_handlers {
                        self.cleanup.install_process_hooks();
                    }
                    report.loaded.push(id);
                },
                Err((stage, error)) => {
                    warn!(reference, stage = %stage, error = %error, "Failed to load plugin");
                    report.failures.push(LoadFailure {
                        reference: reference.to_string(),
                        stage,
                        error,
                    });
                },
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    async fn load_one(
        &mut self,
        declaration: &PluginDeclaration,
        host: &HostContext,
        tree: &mut CommandTree,
    ) -> Result<PluginId, (PluginState, PluginError)> {
        let reference = declaration.package_reference.as_str();
        let at = |stage: PluginState| move |e: PluginError| (stage, e);

        let module = if self.modules.is_linked(reference) {
            ResolvedModule::linked(reference)
        } else {
            self.resolver
                .resolve(reference, &host.working_dir)
                .map_err(at(PluginState::Declared))?
        };

        let plugin = self
            .modules
            .load(&module)
            .and_then(|export| export.instantiate(reference))
            .map_err(at(PluginState::Resolved))?;

        let id = contain_hook(reference, "metadata", || {
            plugin.metadata().validate(&self.host_version)
        })
        .and_then(std::convert::identity)
        .map_err(at(PluginState::Instantiated))?;

        let contributions = Contributions::collect(&id, plugin.as_ref())
            .map_err(at(PluginState::MetadataValid))?;
        self.registry
            .register_plugin(id.clone(), Arc::clone(&plugin), &contributions)
            .map_err(at(PluginState::MetadataValid))?;

        let ctx = PluginContext::new(
            id.clone(),
            declaration.options.clone(),
            host,
            self.host_version.clone(),
        );
        debug!(plugin_id = %id, "Initializing plugin");
        initialize_with_timeout(plugin.as_ref(), &ctx, self.config.init_timeout())
            .await
            .map_err(at(PluginState::Registered))?;

        self.helpers
            .register(&id, contributions.helpers)
            .map_err(at(PluginState::Initializing))?;
        let registers_commands = contain_hook(id.as_str(), "registers_commands", || {
            plugin.registers_commands()
        })
        .map_err(at(PluginState::Initializing))?;
        if registers_commands {
            self.commands
                .register(&id, plugin.as_ref(), tree)
                .map_err(at(PluginState::Initializing))?;
        }

        self.cleanup.push(id.clone(), plugin);
        Ok(id)
    }

    /// Run every active plugin's cleanup hook once.
    pub async fn cleanup(&self) -> CleanupReport {
        self.cleanup.run().await
    }

    /// Handle shared with the shutdown hooks.
    #[must_use]
    pub fn cleanup_handle(&self) -> CleanupHandle {
        self.cleanup.clone()
    }

    /// Ids of plugins currently active, in load order.
    #[must_use]
    pub fn active_plugins(&self) -> Vec<PluginId> {
        self.cleanup.active_ids()
    }

    /// All registered template types, sorted by type.
    #[must_use]
    pub fn all_templates(&self) -> Vec<&RegisteredTemplate> {
        self.registry.all_templates()
    }

    /// All bound helpers, sorted by name.
    #[must_use]
    pub fn all_helpers(&self) -> Vec<&HelperBinding> {
        self.helpers.all_helpers()
    }

    /// The extension registry.
    #[must_use]
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// The helper table for the rendering engine.
    #[must_use]
    pub fn helpers(&self) -> &HelperTable {
        self.helpers.table()
    }

    /// Command ownership.
    #[must_use]
    pub fn commands(&self) -> &CommandRegistrar {
        &self.commands
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Parsed host version.
    #[must_use]
    pub fn host_version(&self) -> &semver::Version {
        &self.host_version
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("loaded_once", &self.loaded_once)
            .finish_non_exhaustive()
    }
}

/// Race `initialize` against `timeout`.
///
/// When the timer wins, the hook future is dropped and the context's
/// cancellation token is cancelled for any work the hook spawned.
async fn initialize_with_timeout(
    plugin: &dyn ExtensionPlugin,
    ctx: &PluginContext,
    timeout: Duration,
) -> PluginResult<()> {
    let plugin_id = ctx.plugin_id().to_string();
    match tokio::time::timeout(timeout, contain_async(plugin.initialize(ctx))).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(PluginError::Initialization {
            plugin_id,
            message: e.to_string(),
        }),
        Ok(Err(panic)) => Err(PluginError::Initialization {
            plugin_id,
            message: format!("panicked: {}", panic_message(panic.as_ref())),
        }),
        Err(_) => {
            ctx.cancellation().cancel();
            Err(PluginError::InitializationTimeout { plugin_id, timeout })
        },
    }
}
