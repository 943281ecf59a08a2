//! Extension registry.
//!
//! Single source of truth for which plugin owns which template type, and
//! the authority the loader consults before anything else is written.
//! Registration is all-or-nothing: every key a plugin would claim is
//! checked against current state before any map is touched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{PluginError, PluginResult};
use crate::helper::{HelperFn, is_valid_helper_name};
use crate::plugin::{ExtensionPlugin, Owner, PluginId};
use crate::shutdown::contain_hook;
use crate::template::TemplateMetadata;

/// What a plugin contributes, captured once from its `templates()` and
/// `helpers()` hooks.
pub struct Contributions {
    /// Template types the plugin wants to own.
    pub templates: Vec<TemplateMetadata>,
    /// Helpers the plugin exposes, keyed by name.
    pub helpers: BTreeMap<String, HelperFn>,
}

impl Contributions {
    /// Call the plugin's contribution hooks.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Panicked`] if either hook panics.
    pub fn collect(id: &PluginId, plugin: &dyn ExtensionPlugin) -> PluginResult<Self> {
        let templates = contain_hook(id.as_str(), "templates", || plugin.templates())?;
        let helpers = contain_hook(id.as_str(), "helpers", || plugin.helpers())?;
        Ok(Self { templates, helpers })
    }
}

impl std::fmt::Debug for Contributions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contributions")
            .field("templates", &self.templates)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A template type and the plugin (or host) that owns it.
#[derive(Debug, Clone)]
pub struct RegisteredTemplate {
    /// Template metadata.
    pub metadata: TemplateMetadata,
    /// Owner of the type.
    pub owner: Owner,
}

/// Registry of plugins, template types and claimed helper names.
pub struct ExtensionRegistry {
    plugins: Vec<(PluginId, Arc<dyn ExtensionPlugin>)>,
    plugin_index: HashMap<PluginId, usize>,
    templates: BTreeMap<String, RegisteredTemplate>,
    helpers: HashMap<String, Owner>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            plugin_index: HashMap::new(),
            templates: BTreeMap::new(),
            helpers: HashMap::new(),
        }
    }

    /// Add a template type owned by the host.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::TemplateConflict`] if the type is already owned.
    pub fn register_builtin_template(&mut self, metadata: TemplateMetadata) -> PluginResult<()> {
        if let Some(existing) = self.templates.get(&metadata.template_type) {
            return Err(PluginError::TemplateConflict {
                template_type: metadata.template_type,
                requested_by: Owner::BuiltIn.to_string(),
                owner: existing.owner.to_string(),
            });
        }
        self.templates.insert(
            metadata.template_type.clone(),
            RegisteredTemplate {
                metadata,
                owner: Owner::BuiltIn,
            },
        );
        Ok(())
    }

    /// Mark a helper name as owned by the host so plugins cannot claim it.
    pub fn reserve_builtin_helper(&mut self, name: impl Into<String>) {
        self.helpers.entry(name.into()).or_insert(Owner::BuiltIn);
    }

    /// Register a plugin together with the templates and helper names it
    /// contributes.
    ///
    /// # Errors
    ///
    /// - [`PluginError::DuplicatePlugin`] if the id is already registered
    /// - [`PluginError::MetadataValidation`] for an empty template type
    /// - [`PluginError::TemplateConflict`] for an already-owned type
    /// - [`PluginError::InvalidHelperName`] / [`PluginError::HelperConflict`]
    ///   for a malformed or already-owned helper name
    ///
    /// On error the registry is left exactly as it was.
    pub fn register_plugin(
        &mut self,
        id: PluginId,
        plugin: Arc<dyn ExtensionPlugin>,
        contributions: &Contributions,
    ) -> PluginResult<()> {
        if self.plugin_index.contains_key(&id) {
            return Err(PluginError::DuplicatePlugin { id: id.to_string() });
        }

        let mut seen = HashSet::new();
        for template in &contributions.templates {
            let ty = &template.template_type;
            if ty.trim().is_empty() {
                return Err(PluginError::MetadataValidation {
                    field: "template.type",
                    message: format!("is empty in a template contributed by '{id}'"),
                });
            }
            if let Some(existing) = self.templates.get(ty) {
                return Err(PluginError::TemplateConflict {
                    template_type: ty.clone(),
                    requested_by: id.to_string(),
                    owner: existing.owner.to_string(),
                });
            }
            if !seen.insert(ty.as_str()) {
                return Err(PluginError::TemplateConflict {
                    template_type: ty.clone(),
                    requested_by: id.to_string(),
                    owner: id.to_string(),
                });
            }
        }

        for name in contributions.helpers.keys() {
            if !is_valid_helper_name(name) {
                return Err(PluginError::InvalidHelperName {
                    name: name.clone(),
                    plugin_id: id.to_string(),
                });
            }
            if let Some(owner) = self.helpers.get(name) {
                return Err(PluginError::HelperConflict {
                    name: name.clone(),
                    requested_by: id.to_string(),
                    owner: owner.to_string(),
                });
            }
        }

        // Commit.
        let owner = Owner::Plugin(id.clone());
        for metadata in &contributions.templates {
            debug!(
                plugin_id = %id,
                template_type = %metadata.template_type,
                "Registered template type"
            );
            self.templates.insert(
                metadata.template_type.clone(),
                RegisteredTemplate {
                    metadata: metadata.clone(),
                    owner: owner.clone(),
                },
            );
        }
        for name in contributions.helpers.keys() {
            self.helpers.insert(name.clone(), owner.clone());
        }
        self.plugin_index.insert(id.clone(), self.plugins.len());
        info!(plugin_id = %id, "Registered plugin");
        self.plugins.push((id, plugin));
        Ok(())
    }

    /// Metadata for a template type.
    #[must_use]
    pub fn get_template(&self, template_type: &str) -> Option<&TemplateMetadata> {
        self.templates.get(template_type).map(|t| &t.metadata)
    }

    /// Whether a template type is registered.
    #[must_use]
    pub fn has_template(&self, template_type: &str) -> bool {
        self.templates.contains_key(template_type)
    }

    /// Owner of a template type.
    #[must_use]
    pub fn template_owner(&self, template_type: &str) -> Option<&Owner> {
        self.templates.get(template_type).map(|t| &t.owner)
    }

    /// All template types, sorted by type.
    #[must_use]
    pub fn all_templates(&self) -> Vec<&RegisteredTemplate> {
        self.templates.values().collect()
    }

    /// Owner of a claimed helper name.
    #[must_use]
    pub fn helper_owner(&self, name: &str) -> Option<&Owner> {
        self.helpers.get(name)
    }

    /// Look up a plugin by id.
    #[must_use]
    pub fn get_plugin(&self, id: &PluginId) -> Option<&Arc<dyn ExtensionPlugin>> {
        self.plugin_index.get(id).map(|&i| &self.plugins[i].1)
    }

    /// All registered plugins in registration order.
    #[must_use]
    pub fn all_plugins(&self) -> &[(PluginId, Arc<dyn ExtensionPlugin>)] {
        &self.plugins
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("plugin_count", &self.plugins.len())
            .field("template_count", &self.templates.len())
            .field("helper_count", &self.helpers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::helper_fn;
    use crate::plugin::PluginMetadata;
    use serde_json::Value;

    struct TestPlugin {
        meta: PluginMetadata,
        templates: Vec<&'static str>,
        helpers: Vec<&'static str>,
    }

    impl TestPlugin {
        fn new(id: &str, templates: Vec<&'static str>, helpers: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                meta: PluginMetadata::new(id, format!("Test Plugin {id}"), "0.1.0"),
                templates,
                helpers,
            })
        }
    }

    #[async_trait::async_trait]
    impl ExtensionPlugin for TestPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }

        fn templates(&self) -> Vec<TemplateMetadata> {
            self.templates
                .iter()
                .map(|t| TemplateMetadata::new(*t, *t, "1.0.0", format!("{t}.json")))
                .collect()
        }

        fn helpers(&self) -> BTreeMap<String, HelperFn> {
            self.helpers
                .iter()
                .map(|h| ((*h).to_string(), helper_fn(|_| Ok(Value::Null))))
                .collect()
        }
    }

    fn id(s: &str) -> PluginId {
        PluginId::from_static(s)
    }

    fn register(
        registry: &mut ExtensionRegistry,
        name: &str,
        templates: Vec<&'static str>,
        helpers: Vec<&'static str>,
    ) -> PluginResult<()> {
        let plugin = TestPlugin::new(name, templates, helpers);
        let contributions = Contributions::collect(&id(name), plugin.as_ref()).unwrap();
        registry.register_plugin(id(name), plugin, &contributions)
    }

    #[test]
    fn test_register_and_query() {
        let mut registry = ExtensionRegistry::new();
        register(&mut registry, "a", vec!["alpha", "beta"], vec!["toUpperSafe"]).unwrap();

        assert!(registry.has_template("alpha"));
        assert_eq!(registry.get_template("beta").unwrap().name, "beta");
        assert_eq!(registry.template_owner("alpha"), Some(&Owner::Plugin(id("a"))));
        assert_eq!(registry.helper_owner("toUpperSafe"), Some(&Owner::Plugin(id("a"))));
        assert_eq!(registry.all_templates().len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let mut registry = ExtensionRegistry::new();
        register(&mut registry, "a", vec![], vec![]).unwrap();
        let err = register(&mut registry, "a", vec!["x"], vec![]).unwrap_err();
        assert!(matches!(err, PluginError::DuplicatePlugin { .. }));
        assert!(!registry.has_template("x"));
    }

    #[test]
    fn test_template_conflict_leaves_registry_unchanged() {
        let mut registry = ExtensionRegistry::new();
        register(&mut registry, "a", vec!["alpha"], vec!["toUpperSafe"]).unwrap();

        // b's first template is new, second collides; neither may land.
        let err =
            register(&mut registry, "b", vec!["gamma", "alpha"], vec!["b:helper"]).unwrap_err();
        match err {
            PluginError::TemplateConflict {
                template_type,
                requested_by,
                owner,
            } => {
                assert_eq!(template_type, "alpha");
                assert_eq!(requested_by, "b");
                assert_eq!(owner, "a");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.has_template("gamma"));
        assert!(registry.helper_owner("b:helper").is_none());
        assert!(registry.get_plugin(&id("b")).is_none());
        assert_eq!(registry.template_owner("alpha"), Some(&Owner::Plugin(id("a"))));
    }

    #[test]
    fn test_helper_conflict_is_atomic() {
        let mut registry = ExtensionRegistry::new();
        register(&mut registry, "a", vec![], vec!["shared"]).unwrap();
        let err = register(&mut registry, "b", vec!["new-type"], vec!["shared"]).unwrap_err();
        assert!(matches!(err, PluginError::HelperConflict { ref owner, .. } if owner == "a"));
        assert!(!registry.has_template("new-type"));
    }

    #[test]
    fn test_builtin_reservations() {
        let mut registry = ExtensionRegistry::new();
        let builtin = TemplateMetadata::new("json-object", "JSON", "1.0.0", "object.json");
        registry.register_builtin_template(builtin).unwrap();
        registry.reserve_builtin_helper("json");

        let err = register(&mut registry, "p", vec!["json-object"], vec![]).unwrap_err();
        assert!(err.to_string().contains("built-in"));

        let err = register(&mut registry, "p", vec![], vec!["json"]).unwrap_err();
        assert!(
            matches!(err, PluginError::HelperConflict { ref owner, .. } if owner == "built-in")
        );
    }

    #[test]
    fn test_self_duplicate_template_rejected() {
        let mut registry = ExtensionRegistry::new();
        let err = register(&mut registry, "p", vec!["dup", "dup"], vec![]).unwrap_err();
        assert!(err.is_conflict());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_all_plugins_keeps_registration_order() {
        let mut registry = ExtensionRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            register(&mut registry, name, vec![], vec![]).unwrap();
        }
        let order: Vec<&str> = registry
            .all_plugins()
            .iter()
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }
}
