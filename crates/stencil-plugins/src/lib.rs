//! Plugin loading and extension registries for the stencil code generator.
//!
//! Plugins extend stencil with three kinds of contribution:
//!
//! - **Template types**, owned through the [`ExtensionRegistry`]
//! - **Template helpers**, bound into the append-only [`HelperTable`]
//! - **CLI subcommands**, appended to the host [`CommandTree`]
//!
//! Every name in every namespace has exactly one owner: either `built-in`
//! (present before any plugin loaded) or the first plugin that claimed it.
//! Later claims are rejected with an error naming both parties.
//!
//! [`PluginLoader::load_plugins_from_config`] processes declarations one at
//! a time in order. Each goes through resolution ([`ModuleResolver`]),
//! instantiation ([`ModuleLoader`]), metadata validation, registration and
//! a time-bounded `initialize` hook. A failure abandons that declaration
//! only. Plugins that become active are cleaned up once at shutdown.
//!
//! # Local plugin paths
//!
//! References starting with `./` or `../` must stay inside the host working
//! directory after normalization; escaping references are rejected before
//! the filesystem is consulted.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod helper;
pub mod loader;
pub mod module;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod shutdown;
pub mod template;

pub use command::{CommandHandler, CommandRegistrar, CommandSpec, CommandTree};
pub use config::{HOST_VERSION, LoaderConfig, PluginDeclaration};
pub use context::{HostContext, LogLevel, LogSink, PluginContext, PluginLogger, TracingLogSink};
pub use error::{PluginError, PluginResult};
pub use helper::{HelperBinding, HelperFn, HelperRegistrar, HelperTable, helper_fn};
pub use loader::{LoadFailure, LoadReport, PluginLoader};
#[cfg(feature = "dynamic-plugins")]
pub use module::DylibModuleLoader;
pub use module::{ModuleLoader, PLUGIN_ENTRY_SYMBOL, PluginExport, StaticModuleLoader};
pub use plugin::{ExtensionPlugin, Owner, PluginId, PluginMetadata, PluginState};
pub use registry::{Contributions, ExtensionRegistry, RegisteredTemplate};
pub use resolver::{
    DefaultResolver, FileSystem, LocalPathResolver, ModuleResolver, ModuleSource,
    PackageResolver, RealFs, ResolvedModule,
};
pub use shutdown::{ActivePlugin, CleanupHandle, CleanupReport};
pub use template::TemplateMetadata;

/// Re-exported so plugin crates implement [`ExtensionPlugin`] with the same macro.
pub use async_trait::async_trait;
