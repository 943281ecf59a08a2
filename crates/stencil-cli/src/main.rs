//! stencil - code generation from JSON templates.
//!
//! The CLI reads `stencil.toml`, loads the declared plugins and then runs
//! either a built-in subcommand or a command contributed by a plugin.
//! Plugin cleanup hooks run before the process exits.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use stencil_telemetry::setup_logging;

mod commands;
mod config;
mod core_plugin;
mod host;
mod theme;

use commands::{OutputFormat, helpers, plugins, templates, validate};
use config::{LoadedConfig, StencilConfig};
use host::Host;

/// stencil - render code from JSON templates
#[derive(Parser)]
#[command(name = "stencil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./stencil.toml)
    #[arg(short, long, global = true, env = "STENCIL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// List registered template types
    Templates {
        /// Only list templates carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// List template helpers and their owners
    Helpers,

    /// Check stencil.toml and report plugin load results
    #[command(alias = "check")]
    Validate,

    /// Commands contributed by plugins
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List declared plugins and their state
    List,

    /// Install a compiled plugin so it can be declared by name
    Install {
        /// Plugin library, or a plugin crate directory
        path: PathBuf,

        /// Package name (defaults to the directory or library name)
        #[arg(long)]
        name: Option<String>,

        /// Install into .stencil/plugins of the current directory
        #[arg(long)]
        workspace: bool,
    },
}

fn run_command(
    command: Commands,
    host: &Host,
    loaded: &LoadedConfig,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Plugins {
            command: PluginCommands::List,
        } => plugins::list_plugins(host, &loaded.config.plugins, format),
        Commands::Plugins {
            command: PluginCommands::Install { .. },
        } => anyhow::bail!("plugins install does not need loaded plugins"),
        Commands::Templates { tag } => templates::list_templates(host, tag.as_deref(), format),
        Commands::Helpers => helpers::list_helpers(host, format),
        Commands::Validate => validate::validate(
            host,
            loaded.path.as_deref(),
            &loaded.config.plugins,
            format,
        ),
        Commands::External(args) => host.run_external(&args),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let working_dir = std::env::current_dir().context("failed to get current directory")?;
    let loaded = StencilConfig::load(cli.config.as_deref(), &working_dir)?;

    // Config level, then -v, then STENCIL_LOG.
    let log_config = loaded
        .config
        .logging
        .clone()
        .with_verbosity(cli.verbose)
        .with_env_override();
    let _log_guard = match setup_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };

    let format = OutputFormat::parse(&cli.format);
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    // Installing only copies files.
    if let Commands::Plugins {
        command: PluginCommands::Install {
            path,
            name,
            workspace,
        },
    } = &command
    {
        return plugins::install_plugin(path, name.as_deref(), *workspace, &working_dir);
    }

    let host = Host::start(&loaded.config, &working_dir).await?;
    let reports_itself = matches!(
        command,
        Commands::Validate
            | Commands::Plugins {
                command: PluginCommands::List
            }
    );
    if !reports_itself {
        host.print_report(cli.verbose > 0);
    }

    let result = host
        .run_guarded(|| run_command(command, &host, &loaded, format))
        .await;
    host.shutdown().await;
    result
}
