//! Wiring between the CLI and the plugin loader.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::CommandFactory;
use serde_json::Value;
use stencil_plugins::{
    CommandSpec, CommandTree, HelperTable, HostContext, LoadReport, ModuleLoader, PluginExport,
    PluginLoader, StaticModuleLoader, helper_fn,
};
use tracing::{debug, warn};

use crate::Cli;
use crate::config::{CORE_PACKAGE, StencilConfig};
use crate::core_plugin::CorePlugin;
use crate::theme::Theme;

/// A loaded host: registries, the command tree and how loading went.
pub(crate) struct Host {
    pub(crate) loader: PluginLoader,
    pub(crate) report: LoadReport,
    pub(crate) tree: CommandTree,
}

impl Host {
    /// Build the loader, seed built-ins and load every declared plugin.
    pub(crate) async fn start(config: &StencilConfig, working_dir: &Path) -> Result<Self> {
        let mut loader = PluginLoader::new(config.loader.clone())
            .context("invalid [loader] configuration")?
            .with_module_loader(module_loader())
            .with_helper_table(builtin_helpers()?);
        let mut tree = builtin_command_tree();

        let report = loader
            .load_plugins_from_config(&config.plugins, &HostContext::new(working_dir), &mut tree)
            .await
            .context("plugin loading aborted")?;
        debug!(summary = %report.summary(), commands = tree.len(), "Host ready");

        Ok(Self {
            loader,
            report,
            tree,
        })
    }

    /// Print the load summary to stderr.
    ///
    /// Failures are always shown; a clean load is only reported when
    /// `verbose` is set.
    pub(crate) fn print_report(&self, verbose: bool) {
        if self.report.is_complete() {
            if verbose && self.report.total > 0 {
                eprintln!("{}", Theme::success(&self.report.summary()));
            }
            return;
        }
        eprintln!("{}", Theme::warning(&self.report.summary()));
        for failure in &self.report.failures {
            eprintln!("  {}", Theme::error(&failure.to_string()));
        }
    }

    /// Run a plugin command: `args[0]` is the name or alias.
    pub(crate) fn run_external(&self, args: &[String]) -> Result<()> {
        let (name, rest) = args.split_first().context("missing command name")?;
        let command = self
            .tree
            .find(name)
            .with_context(|| {
                format!("unknown command '{name}'; run `stencil --help` to list commands")
            })?;
        command.run(rest)?;
        Ok(())
    }

    /// Run a command. A panic escaping it runs plugin cleanup before it
    /// unwinds further.
    pub(crate) async fn run_guarded<T>(&self, command: impl FnOnce() -> T) -> T {
        self.loader
            .cleanup_handle()
            .guard(async move { command() })
            .await
    }

    /// Run plugin cleanup hooks. Failures are printed, never fatal.
    pub(crate) async fn shutdown(&self) {
        let report = self.loader.cleanup().await;
        for failure in &report.failures {
            warn!(error = %failure, "Plugin cleanup failed");
            eprintln!("{}", Theme::warning(&failure.to_string()));
        }
    }
}

/// Host commands known before any plugin loads, taken from the clap definition.
pub(crate) fn builtin_command_tree() -> CommandTree {
    let cli = Cli::command();
    let mut tree = CommandTree::new();
    for sub in cli.get_subcommands() {
        let about = sub.get_about().map(ToString::to_string).unwrap_or_default();
        let mut spec = CommandSpec::new(sub.get_name(), about);
        for alias in sub.get_all_aliases() {
            spec = spec.alias(alias);
        }
        tree.add_command(spec);
    }
    tree.add_command(CommandSpec::new("help", "Print help"));
    tree
}

/// Helpers owned by the host.
pub(crate) fn builtin_helpers() -> Result<HelperTable> {
    let table = HelperTable::new()
        .with_builtin(
            "default",
            helper_fn(|args| {
                Ok(args
                    .iter()
                    .find(|v| !v.is_null())
                    .cloned()
                    .unwrap_or(Value::Null))
            }),
        )?
        .with_builtin(
            "concat",
            helper_fn(|args| {
                let joined: String = args
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Ok(Value::String(joined))
            }),
        )?;
    Ok(table)
}

fn linked_modules() -> StaticModuleLoader {
    let mut modules = StaticModuleLoader::new();
    modules.link(CORE_PACKAGE, PluginExport::Instance(Arc::new(CorePlugin::new())));
    modules
}

#[cfg(feature = "dynamic-plugins")]
fn module_loader() -> impl ModuleLoader {
    stencil_plugins::DylibModuleLoader::new(linked_modules())
}

#[cfg(not(feature = "dynamic-plugins"))]
fn module_loader() -> impl ModuleLoader {
    linked_modules()
}
