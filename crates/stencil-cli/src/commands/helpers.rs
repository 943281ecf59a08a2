//! `stencil helpers`: list bound template helpers.

use anyhow::Result;
use serde_json::json;

use super::{OutputFormat, print_json};
use crate::host::Host;
use crate::theme::Theme;

pub(crate) fn list_helpers(host: &Host, format: OutputFormat) -> Result<()> {
    let helpers = host.loader.all_helpers();

    if format == OutputFormat::Json {
        let rows: Vec<_> = helpers
            .iter()
            .map(|h| json!({ "name": h.name, "owner": h.owner.to_string() }))
            .collect();
        return print_json(&json!(rows));
    }

    println!("{}", Theme::header("Helpers"));
    println!("  {:<32} OWNER", "NAME");
    println!("{}", Theme::separator());
    for h in &helpers {
        println!("  {:<32} {}", h.name, Theme::owner(&h.owner.to_string()));
    }
    println!("\n{}", Theme::dimmed(&format!("{} helper(s)", helpers.len())));
    Ok(())
}
