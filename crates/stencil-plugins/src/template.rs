//! Template type metadata contributed by plugins.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Describes one template type a plugin (or the host) provides.
///
/// `template_type` is the registry key; everything else is informational
/// for the rendering engine and for `stencil templates` listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Unique template type identifier (e.g. `"network.vnet"`).
    #[serde(rename = "type")]
    pub template_type: String,
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Template version.
    pub version: String,
    /// Location of the template source, relative to the plugin.
    pub template_path: PathBuf,
    /// Free-form tags for filtering.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Link to documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
}

impl TemplateMetadata {
    /// Create template metadata with the required fields.
    #[must_use]
    pub fn new(
        template_type: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        template_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template_type: template_type.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            template_path: template_path.into(),
            tags: BTreeSet::new(),
            documentation_url: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set the documentation link.
    #[must_use]
    pub fn with_documentation_url(mut self, url: impl Into<String>) -> Self {
        self.documentation_url = Some(url.into());
        self
    }

    /// Whether the template carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
