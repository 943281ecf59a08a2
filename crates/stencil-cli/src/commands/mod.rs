//! Built-in subcommands.

pub(crate) mod helpers;
pub(crate) mod plugins;
pub(crate) mod templates;
pub(crate) mod validate;

/// How command output is rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Colored tables for humans.
    Pretty,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Parse `--format`; anything but `json` is pretty.
    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// JSON shape of a failed declaration.
pub(crate) fn failure_json(failure: &stencil_plugins::LoadFailure) -> serde_json::Value {
    serde_json::json!({
        "package": failure.reference,
        "stage": failure.stage.to_string(),
        "error": failure.error.to_string(),
    })
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
