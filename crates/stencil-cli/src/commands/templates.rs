//! `stencil templates`: list registered template types.

use anyhow::Result;
use serde_json::json;
use stencil_plugins::RegisteredTemplate;

use super::{OutputFormat, print_json};
use crate::host::Host;
use crate::theme::Theme;

/// Templates in type order, optionally restricted to one tag.
pub(crate) fn select<'a>(host: &'a Host, tag: Option<&str>) -> Vec<&'a RegisteredTemplate> {
    host.loader
        .all_templates()
        .into_iter()
        .filter(|t| tag.is_none_or(|tag| t.metadata.has_tag(tag)))
        .collect()
}

pub(crate) fn list_templates(host: &Host, tag: Option<&str>, format: OutputFormat) -> Result<()> {
    let templates = select(host, tag);

    if format == OutputFormat::Json {
        let rows: Vec<_> = templates
            .iter()
            .map(|t| {
                json!({
                    "type": t.metadata.template_type,
                    "name": t.metadata.name,
                    "version": t.metadata.version,
                    "description": t.metadata.description,
                    "tags": t.metadata.tags,
                    "owner": t.owner.to_string(),
                })
            })
            .collect();
        return print_json(&json!(rows));
    }

    if templates.is_empty() {
        let message = match tag {
            Some(tag) => format!("No templates tagged '{tag}'"),
            None => "No templates registered".to_string(),
        };
        println!("{}", Theme::info(&message));
        return Ok(());
    }

    println!("{}", Theme::header("Templates"));
    println!("  {:<24} {:<24} {:<10} OWNER", "TYPE", "NAME", "VERSION");
    println!("{}", Theme::separator());
    for t in &templates {
        println!(
            "  {:<24} {:<24} {:<10} {}",
            t.metadata.template_type,
            t.metadata.name,
            t.metadata.version,
            Theme::owner(&t.owner.to_string())
        );
        if !t.metadata.description.is_empty() {
            println!("    {}", Theme::dimmed(&t.metadata.description));
        }
    }
    println!("\n{}", Theme::dimmed(&format!("{} template(s)", templates.len())));
    Ok(())
}
