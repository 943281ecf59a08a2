//! Turning resolved modules into plugin objects.
//!
//! A [`ModuleLoader`] maps a [`ResolvedModule`] to a [`PluginExport`]: either
//! a ready plugin instance, a zero-argument constructor, or something
//! unusable. [`StaticModuleLoader`] serves plugins compiled into the host;
//! with the `dynamic-plugins` feature, `DylibModuleLoader` opens shared
//! libraries exporting [`PLUGIN_ENTRY_SYMBOL`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::ExtensionPlugin;
use crate::resolver::ResolvedModule;
use crate::shutdown::{contain, panic_message};

/// Symbol a dynamic plugin library must export. See [`export_plugin!`](crate::export_plugin).
pub const PLUGIN_ENTRY_SYMBOL: &str = "stencil_plugin_entry";

/// Zero-argument plugin constructor.
pub type PluginConstructor = Arc<dyn Fn() -> PluginResult<Arc<dyn ExtensionPlugin>> + Send + Sync>;

/// What a module exposes.
#[derive(Clone)]
pub enum PluginExport {
    /// A ready-made plugin object.
    Instance(Arc<dyn ExtensionPlugin>),
    /// A constructor to call with no arguments.
    Constructor(PluginConstructor),
    /// The module exposes something that is neither; the string describes it.
    Unsupported(String),
}

impl PluginExport {
    /// Wrap a constructor closure.
    pub fn constructor<F>(f: F) -> Self
    where
        F: Fn() -> PluginResult<Arc<dyn ExtensionPlugin>> + Send + Sync + 'static,
    {
        Self::Constructor(Arc::new(f))
    }

    /// Produce the plugin object.
    ///
    /// Constructors are called exactly once. A constructor that fails or
    /// panics is reported as an invalid export.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPluginExport`].
    pub fn instantiate(self, reference: &str) -> PluginResult<Arc<dyn ExtensionPlugin>> {
        match self {
            Self::Instance(plugin) => Ok(plugin),
            Self::Constructor(ctor) => {
                match contain(|| ctor()) {
                    Ok(Ok(plugin)) => Ok(plugin),
                    Ok(Err(e)) => Err(PluginError::InvalidPluginExport {
                        reference: reference.to_string(),
                        message: format!("constructor failed: {e}"),
                    }),
                    Err(panic) => Err(PluginError::InvalidPluginExport {
                        reference: reference.to_string(),
                        message: format!("constructor panicked: {}", panic_message(panic.as_ref())),
                    }),
                }
            },
            Self::Unsupported(what) => Err(PluginError::InvalidPluginExport {
                reference: reference.to_string(),
                message: format!("expected a plugin object or constructor, found {what}"),
            }),
        }
    }
}

impl fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(p) => f.debug_tuple("Instance").field(&p.metadata().id).finish(),
            Self::Constructor(_) => f.write_str("Constructor"),
            Self::Unsupported(what) => f.debug_tuple("Unsupported").field(what).finish(),
        }
    }
}

/// Produces plugin exports for resolved modules.
pub trait ModuleLoader: Send + Sync {
    /// Load the module and return its export.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPluginExport`] when the module cannot be
    /// turned into an export.
    fn load(&self, module: &ResolvedModule) -> PluginResult<PluginExport>;

    /// Whether `reference` is linked into the host and needs no resolution.
    fn is_linked(&self, _reference: &str) -> bool {
        false
    }
}

struct StaticEntry {
    export: PluginExport,
    linked: bool,
}

/// Plugins compiled into the host binary, keyed by package reference.
#[derive(Default)]
pub struct StaticModuleLoader {
    entries: HashMap<String, StaticEntry>,
}

impl StaticModuleLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `export` for a reference that still goes through resolution.
    pub fn register(&mut self, reference: impl Into<String>, export: PluginExport) -> &mut Self {
        self.entries.insert(
            reference.into(),
            StaticEntry {
                export,
                linked: false,
            },
        );
        self
    }

    /// Serve a plugin instance for a reference that still goes through resolution.
    pub fn register_instance(
        &mut self,
        reference: impl Into<String>,
        plugin: Arc<dyn ExtensionPlugin>,
    ) -> &mut Self {
        self.register(reference, PluginExport::Instance(plugin))
    }

    /// Serve a constructor for a reference that still goes through resolution.
    pub fn register_constructor<F>(&mut self, reference: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn() -> PluginResult<Arc<dyn ExtensionPlugin>> + Send + Sync + 'static,
    {
        self.register(reference, PluginExport::constructor(f))
    }

    /// Serve `export` for a package that ships inside the host binary.
    /// Declarations naming it skip filesystem resolution.
    pub fn link(&mut self, package: impl Into<String>, export: PluginExport) -> &mut Self {
        self.entries.insert(
            package.into(),
            StaticEntry {
                export,
                linked: true,
            },
        );
        self
    }

    /// Whether a reference has an entry.
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, module: &ResolvedModule) -> PluginResult<PluginExport> {
        match self.entries.get(&module.reference) {
            Some(entry) => {
                debug!(
                    reference = %module.reference,
                    linked = entry.linked,
                    "Loaded static plugin module"
                );
                Ok(entry.export.clone())
            },
            None => Err(PluginError::InvalidPluginExport {
                reference: module.reference.clone(),
                message: match module.path() {
                    Some(path) => format!(
                        "{} is not linked into this host; rebuild with the `dynamic-plugins` feature to load compiled libraries",
                        path.display()
                    ),
                    None => "module exports nothing".into(),
                },
            }),
        }
    }

    fn is_linked(&self, reference: &str) -> bool {
        self.entries.get(reference).is_some_and(|e| e.linked)
    }
}

impl fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut refs: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        refs.sort_unstable();
        f.debug_struct("StaticModuleLoader")
            .field("references", &refs)
            .finish()
    }
}

#[cfg(feature = "dynamic-plugins")]
pub use dylib::{DylibModuleLoader, PluginEntryFn};

#[cfg(feature = "dynamic-plugins")]
#[allow(unsafe_code)]
mod dylib {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use libloading::Library;
    use tracing::info;

    use super::{ModuleLoader, PLUGIN_ENTRY_SYMBOL, PluginExport, StaticModuleLoader};
    use crate::command::CommandTree;
    use crate::context::PluginContext;
    use crate::error::{PluginError, PluginResult};
    use crate::helper::HelperFn;
    use crate::plugin::{ExtensionPlugin, PluginMetadata};
    use crate::resolver::ResolvedModule;
    use crate::template::TemplateMetadata;

    /// Signature of [`PLUGIN_ENTRY_SYMBOL`].
    ///
    /// Host and plugin must be built with the same compiler and the same
    /// version of this crate; the trait object crosses the boundary as-is.
    #[allow(improper_ctypes_definitions)]
    pub type PluginEntryFn = unsafe extern "C" fn() -> Box<dyn ExtensionPlugin>;

    /// A plugin object that keeps its library mapped.
    ///
    /// Field order matters: the plugin drops before the library unloads.
    struct LibraryPlugin {
        plugin: Box<dyn ExtensionPlugin>,
        _library: Library,
    }

    #[async_trait]
    impl ExtensionPlugin for LibraryPlugin {
        fn metadata(&self) -> &PluginMetadata {
            self.plugin.metadata()
        }

        async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
            self.plugin.initialize(ctx).await
        }

        fn templates(&self) -> Vec<TemplateMetadata> {
            self.plugin.templates()
        }

        fn helpers(&self) -> BTreeMap<String, HelperFn> {
            self.plugin.helpers()
        }

        fn registers_commands(&self) -> bool {
            self.plugin.registers_commands()
        }

        fn register_commands(&self, tree: &mut CommandTree) -> PluginResult<()> {
            self.plugin.register_commands(tree)
        }

        async fn cleanup(&self) -> PluginResult<()> {
            self.plugin.cleanup().await
        }
    }

    /// Loads compiled plugin libraries, falling back to statically linked modules.
    #[derive(Debug, Default)]
    pub struct DylibModuleLoader {
        statics: StaticModuleLoader,
    }

    impl DylibModuleLoader {
        /// Create a loader that consults `statics` first.
        #[must_use]
        pub fn new(statics: StaticModuleLoader) -> Self {
            Self { statics }
        }

        fn open(reference: &str, path: &Path) -> PluginResult<PluginExport> {
            let invalid = |message: String| PluginError::InvalidPluginExport {
                reference: reference.to_string(),
                message,
            };

            // SAFETY: the library is trusted to export `PLUGIN_ENTRY_SYMBOL`
            // with the `PluginEntryFn` signature. Loading it runs arbitrary
            // initializers from a path the user configured.
            unsafe {
                let library = Library::new(path)
                    .map_err(|e| invalid(format!("failed to open {}: {e}", path.display())))?;
                let entry: libloading::Symbol<'_, PluginEntryFn> = library
                    .get(PLUGIN_ENTRY_SYMBOL.as_bytes())
                    .map_err(|e| {
                        invalid(format!("missing entry point '{PLUGIN_ENTRY_SYMBOL}': {e}"))
                    })?;
                let plugin = entry();
                info!(reference, path = %path.display(), "Opened plugin library");
                Ok(PluginExport::Instance(Arc::new(LibraryPlugin {
                    plugin,
                    _library: library,
                })))
            }
        }
    }

    impl ModuleLoader for DylibModuleLoader {
        fn load(&self, module: &ResolvedModule) -> PluginResult<PluginExport> {
            if self.statics.contains(&module.reference) {
                return self.statics.load(module);
            }
            match module.path() {
                Some(path) => Self::open(&module.reference, path),
                None => self.statics.load(module),
            }
        }

        fn is_linked(&self, reference: &str) -> bool {
            self.statics.is_linked(reference)
        }
    }
}

/// Export a plugin type from a `cdylib` crate.
///
/// The type must implement [`ExtensionPlugin`] and `Default`.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct NetworkPlugin { /* ... */ }
///
/// stencil_plugins::export_plugin!(NetworkPlugin);
/// ```
#[cfg(feature = "dynamic-plugins")]
#[macro_export]
macro_rules! export_plugin {
    ($plugin:ty) => {
        #[allow(unsafe_code, improper_ctypes_definitions)]
        #[unsafe(no_mangle)]
        pub extern "C" fn stencil_plugin_entry() -> ::std::boxed::Box<dyn $crate::ExtensionPlugin> {
            ::std::boxed::Box::new(<$plugin as ::std::default::Default>::default())
        }
    };
}
