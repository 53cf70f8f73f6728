//! Plugin manifest definition

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::errors::PluginError;
use crate::domain::entities::{is_valid_plugin_name, PluginDescriptor};

/// File whose presence marks a directory as a plugin
pub const MANIFEST_FILE: &str = "plugin.yaml";

fn default_true() -> bool {
    true
}

/// Plugin metadata
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    /// Plugin name (required)
    pub name: String,

    /// Plugin version (required)
    pub version: String,

    /// Plugin description
    #[serde(default)]
    pub description: Option<String>,

    /// Plugin author
    #[serde(default)]
    pub author: Option<String>,

    /// Plugins that must be loaded first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Plugins looked up at call time, if present
    #[serde(default)]
    pub optional_dependencies: Vec<String>,

    /// Initial enabled flag when nothing is persisted
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,

    /// Free-form settings handed to the plugin through its context
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            author: None,
            dependencies: Vec::new(),
            optional_dependencies: Vec::new(),
            enabled_by_default: true,
            settings: serde_yaml::Value::Null,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_optional_dependencies(mut self, deps: &[&str]) -> Self {
        self.optional_dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::Manifest(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| PluginError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, PluginError> {
        let manifest: Self = serde_yaml::from_str(content)
            .map_err(|e| PluginError::Manifest(format!("Failed to parse manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if !is_valid_plugin_name(&self.name) {
            return Err(PluginError::InvalidName(format!("plugin '{}'", self.name)));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::Manifest(format!("plugin '{}' has no version", self.name)));
        }
        Ok(())
    }

    /// Descriptor for the loader, before any persisted flag is applied
    pub fn to_descriptor(&self, source_dir: Option<PathBuf>) -> PluginDescriptor {
        let mut descriptor = PluginDescriptor::new(&self.name, &self.version)
            .with_dependencies(self.dependencies.clone())
            .with_optional_dependencies(self.optional_dependencies.clone())
            .with_enabled(self.enabled_by_default);
        descriptor.description = self.description.clone();
        descriptor.source_dir = source_dir;
        descriptor
    }
}
