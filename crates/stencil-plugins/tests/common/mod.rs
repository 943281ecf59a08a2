//! Shared fixtures for plugin loader integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use stencil_plugins::{
    CommandSpec, CommandTree, ExtensionPlugin, FileSystem, HelperFn, LoaderConfig, PluginContext,
    PluginError, PluginLoader, PluginMetadata, PluginResult, TemplateMetadata, async_trait,
    helper_fn,
};
use tokio_util::sync::CancellationToken;

/// Ordered record of hook invocations across all test plugins.
#[derive(Debug, Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// How a test plugin's `initialize` hook behaves.
#[derive(Debug, Clone)]
pub enum InitBehavior {
    Succeed,
    Fail(String),
    Hang,
    Panic,
    /// Spawn a task that panics and observe the failure through its `JoinHandle`.
    PanicInTask,
}

/// How a test plugin's `cleanup` hook behaves.
#[derive(Debug, Clone, Copy)]
pub enum CleanupBehavior {
    Succeed,
    Fail,
    Hang,
}

fn explode(what: &str) {
    panic!("{what} exploded");
}

/// Configurable plugin used across the integration tests.
pub struct TestPlugin {
    meta: PluginMetadata,
    templates: Vec<TemplateMetadata>,
    helpers: Vec<String>,
    commands: Vec<CommandSpec>,
    init: InitBehavior,
    cleanup: CleanupBehavior,
    panics_in: Option<&'static str>,
    log: Arc<CallLog>,
    seen_token: Arc<Mutex<Option<CancellationToken>>>,
    seen_options: Arc<Mutex<Option<serde_json::Map<String, Value>>>>,
}

impl TestPlugin {
    pub fn new(id: &str, log: &Arc<CallLog>) -> Self {
        Self {
            meta: PluginMetadata::new(id, format!("Test plugin {id}"), "1.0.0"),
            templates: Vec::new(),
            helpers: Vec::new(),
            commands: Vec::new(),
            init: InitBehavior::Succeed,
            cleanup: CleanupBehavior::Succeed,
            panics_in: None,
            log: Arc::clone(log),
            seen_token: Arc::default(),
            seen_options: Arc::default(),
        }
    }

    pub fn with_metadata(mut self, meta: PluginMetadata) -> Self {
        self.meta = meta;
        self
    }

    pub fn template(mut self, template_type: &str) -> Self {
        self.templates.push(TemplateMetadata::new(
            template_type,
            template_type,
            "1.0.0",
            format!("templates/{template_type}.json"),
        ));
        self
    }

    pub fn helper(mut self, name: &str) -> Self {
        self.helpers.push(name.to_string());
        self
    }

    pub fn command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn init(mut self, behavior: InitBehavior) -> Self {
        self.init = behavior;
        self
    }

    pub fn cleanup(mut self, behavior: CleanupBehavior) -> Self {
        self.cleanup = behavior;
        self
    }

    /// Make the named synchronous hook panic.
    pub fn panics_in(mut self, hook: &'static str) -> Self {
        self.panics_in = Some(hook);
        self
    }

    fn maybe_panic(&self, hook: &str) {
        if self.panics_in == Some(hook) {
            explode(hook);
        }
    }

    pub fn token_slot(&self) -> Arc<Mutex<Option<CancellationToken>>> {
        Arc::clone(&self.seen_token)
    }

    pub fn options_slot(&self) -> Arc<Mutex<Option<serde_json::Map<String, Value>>>> {
        Arc::clone(&self.seen_options)
    }

    pub fn build(self) -> Arc<dyn ExtensionPlugin> {
        Arc::new(self)
    }
}

#[async_trait]
impl ExtensionPlugin for TestPlugin {
    fn metadata(&self) -> &PluginMetadata {
        self.maybe_panic("metadata");
        &self.meta
    }

    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
        self.log.record(format!("initialize:{}", self.meta.id));
        *self.seen_token.lock().unwrap() = Some(ctx.cancellation().clone());
        *self.seen_options.lock().unwrap() = Some(ctx.options().clone());
        match &self.init {
            InitBehavior::Succeed => Ok(()),
            InitBehavior::Fail(message) => Err(PluginError::hook(message.clone())),
            InitBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            },
            InitBehavior::Panic => panic!("initialize exploded"),
            InitBehavior::PanicInTask => {
                let joined = tokio::spawn(async { explode("background task") }).await;
                assert!(joined.is_err_and(|e| e.is_panic()));
                Ok(())
            },
        }
    }

    fn templates(&self) -> Vec<TemplateMetadata> {
        self.maybe_panic("templates");
        self.templates.clone()
    }

    fn helpers(&self) -> BTreeMap<String, HelperFn> {
        self.maybe_panic("helpers");
        let id = self.meta.id.clone();
        self.helpers
            .iter()
            .map(|name| {
                let id = id.clone();
                (
                    name.clone(),
                    helper_fn(move |_| Ok(Value::String(format!("from {id}")))),
                )
            })
            .collect()
    }

    fn registers_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    fn register_commands(&self, tree: &mut CommandTree) -> PluginResult<()> {
        self.maybe_panic("register_commands");
        for command in &self.commands {
            tree.add_command(command.clone());
        }
        Ok(())
    }

    async fn cleanup(&self) -> PluginResult<()> {
        self.log.record(format!("cleanup:{}", self.meta.id));
        match self.cleanup {
            CleanupBehavior::Succeed => Ok(()),
            CleanupBehavior::Fail => Err(PluginError::hook("cleanup failed")),
            CleanupBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            },
        }
    }
}

/// Loader config that leaves process-wide hooks alone.
pub fn test_config() -> LoaderConfig {
    LoaderConfig {
        install_signal_handlers: false,
        ..LoaderConfig::default()
    }
}

/// Loader with the test config and the given static modules.
pub fn loader_with(modules: stencil_plugins::StaticModuleLoader) -> PluginLoader {
    PluginLoader::new(test_config())
        .unwrap()
        .with_module_loader(modules)
}

/// Host command tree with the built-in subcommands.
pub fn builtin_tree() -> CommandTree {
    let mut tree = CommandTree::new();
    tree.add_command(CommandSpec::new("validate", "Validate templates").alias("check"))
        .add_command(CommandSpec::new("templates", "List template types"))
        .add_command(CommandSpec::new("helpers", "List template helpers"));
    tree
}

/// Records every filesystem lookup and reports nothing as present.
#[derive(Debug, Default)]
pub struct SpyFs {
    lookups: Mutex<Vec<PathBuf>>,
}

impl SpyFs {
    pub fn lookups(&self) -> Vec<PathBuf> {
        self.lookups.lock().unwrap().clone()
    }

    fn note(&self, path: &Path) {
        self.lookups.lock().unwrap().push(path.to_path_buf());
    }
}

impl FileSystem for SpyFs {
    fn exists(&self, path: &Path) -> bool {
        self.note(path);
        false
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.note(path);
        false
    }

    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<PathBuf>> {
        self.note(path);
        Ok(Vec::new())
    }
}
