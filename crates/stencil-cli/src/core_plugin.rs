//! The plugin compiled into the `stencil` binary.
//!
//! It is linked into the module loader as the `stencil-core` package, so it
//! goes through the same validation and ownership rules as any other plugin
//! and can be turned off with `enabled = false`.

use std::collections::BTreeMap;

use serde_json::Value;
use stencil_plugins::{
    CommandSpec, CommandTree, ExtensionPlugin, HOST_VERSION, HelperFn, PluginContext, PluginError,
    PluginMetadata, PluginResult, TemplateMetadata, async_trait, helper_fn,
};

/// Templates, helpers and the `json` command shipped with stencil.
pub(crate) struct CorePlugin {
    meta: PluginMetadata,
}

impl CorePlugin {
    pub(crate) fn new() -> Self {
        Self {
            meta: PluginMetadata::new("core", "Stencil core", HOST_VERSION)
                .with_description("Templates and helpers bundled with stencil")
                .with_author("stencil"),
        }
    }
}

#[async_trait]
impl ExtensionPlugin for CorePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
        ctx.logger().debug("core templates ready");
        Ok(())
    }

    fn templates(&self) -> Vec<TemplateMetadata> {
        vec![
            TemplateMetadata::new(
                "json-object",
                "JSON object",
                "1.0.0",
                "templates/json-object.json",
            )
            .with_description("A single JSON object built from key/value inputs")
            .with_tag("json")
            .with_tag("core"),
        ]
    }

    fn helpers(&self) -> BTreeMap<String, HelperFn> {
        BTreeMap::from([
            ("json:stringify".to_string(), helper_fn(stringify)),
            ("str:upper".to_string(), helper_fn(upper)),
        ])
    }

    fn registers_commands(&self) -> bool {
        true
    }

    fn register_commands(&self, tree: &mut CommandTree) -> PluginResult<()> {
        let about = "Print the arguments as a JSON array of strings";
        tree.add_command(CommandSpec::new("json", about).handler(|args| {
            let line =
                serde_json::to_string(args).map_err(|e| PluginError::hook(e.to_string()))?;
            println!("{line}");
            Ok(())
        }));
        Ok(())
    }
}

/// `json:stringify value [pretty]`
fn stringify(args: &[Value]) -> PluginResult<Value> {
    let value = args
        .first()
        .ok_or_else(|| PluginError::hook("json:stringify expects a value"))?;
    let pretty = args.get(1).and_then(Value::as_bool).unwrap_or(false);
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| PluginError::hook(e.to_string()))?;
    Ok(Value::String(text))
}

/// `str:upper text`
fn upper(args: &[Value]) -> PluginResult<Value> {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        Some(other) => Err(PluginError::hook(format!("str:upper expects a string, got {other}"))),
        None => Err(PluginError::hook("str:upper expects a string")),
    }
}
