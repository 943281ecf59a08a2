//! `stencil validate`: check the config file and report how plugins loaded.

use std::path::Path;

use anyhow::{Result, bail};
use serde_json::json;
use stencil_plugins::PluginDeclaration;

use super::{OutputFormat, failure_json, print_json};
use crate::host::Host;
use crate::theme::Theme;

pub(crate) fn validate(
    host: &Host,
    config_path: Option<&Path>,
    declarations: &[PluginDeclaration],
    format: OutputFormat,
) -> Result<()> {
    let report = &host.report;
    let source = config_path.map_or_else(
        || "built-in defaults (no stencil.toml)".to_string(),
        |p| p.display().to_string(),
    );

    if format == OutputFormat::Json {
        let failures: Vec<_> = report.failures.iter().map(failure_json).collect();
        print_json(&json!({
            "config": source,
            "declared": declarations.len(),
            "skipped": report.skipped,
            "loaded": report.loaded.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            "failures": failures,
            "templates": host.loader.all_templates().len(),
            "helpers": host.loader.all_helpers().len(),
            "commands": host.tree.len(),
        }))?;
    } else {
        println!("{}", Theme::header("Configuration"));
        println!("  {:<12} {source}", "config");
        println!(
            "  {:<12} {} declared, {} disabled",
            "plugins",
            declarations.len(),
            report.skipped
        );
        println!("{}", Theme::separator());
        for id in &report.loaded {
            println!("  {}", Theme::success(id.as_str()));
        }
        for failure in &report.failures {
            println!("  {}", Theme::error(&failure.to_string()));
        }
        println!(
            "\n{}",
            Theme::dimmed(&format!(
                "{} template(s), {} helper(s), {} command(s)",
                host.loader.all_templates().len(),
                host.loader.all_helpers().len(),
                host.tree.len()
            ))
        );
        if report.is_complete() {
            println!("{}", Theme::success(&report.summary()));
        }
    }

    if !report.is_complete() {
        bail!("{}; {} plugin(s) failed", report.summary(), report.failures.len());
    }
    Ok(())
}
