use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Plugin names follow the same rules as command names
pub fn is_valid_plugin_name(name: &str) -> bool {
    super::command::is_valid_command_name(name)
}

/// Lifecycle state of a plugin
///
/// `Unloaded -> Loading -> Loaded -> {Enabled <-> Disabled} -> Unloading -> Unloaded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Enabled,
    Disabled,
    Unloading,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Unloading => "unloading",
        }
    }

    /// Module instance exists and `on_load` has completed
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            PluginState::Loaded | PluginState::Enabled | PluginState::Disabled
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loadable feature module as known to the kernel
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub optional_dependencies: Vec<String>,
    pub state: PluginState,
    /// Desired routing visibility; survives reloads
    pub enabled: bool,
    /// Directory the plugin was discovered in, if any
    pub source_dir: Option<PathBuf>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            dependencies: Vec::new(),
            optional_dependencies: Vec::new(),
            state: PluginState::Unloaded,
            enabled: true,
            source_dir: None,
            loaded_at: None,
            last_error: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_optional_dependencies(mut self, deps: Vec<String>) -> Self {
        self.optional_dependencies = deps;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn is_routable(&self) -> bool {
        self.state == PluginState::Enabled
    }
}
