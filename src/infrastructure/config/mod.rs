//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Kernel configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    pub routing: RoutingConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    /// Users allowed to manage plugins; empty allows everyone
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginConfig {
    /// Roots scanned for plugin directories
    pub directories: Vec<PathBuf>,
    pub lifecycle_timeout_ms: u64,
    pub hot_reload: bool,
    pub debounce_ms: u64,
    /// Plugins kept disabled regardless of persisted state
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RoutingConfig {
    pub handler_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "carik-bot".to_string(),
            admins: Vec::new(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from("./plugins")],
            lifecycle_timeout_ms: 10_000,
            hot_reload: true,
            debounce_ms: 300,
            disabled: Vec::new(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 3_000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("carik.db"),
        }
    }
}

impl PluginConfig {
    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RoutingConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.lifecycle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "plugins.lifecycle-timeout-ms must be greater than 0".to_string(),
            ));
        }
        if self.routing.handler_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "routing.handler-timeout-ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults with environment overrides applied
    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Override fields from `CARIK_PLUGIN_DIR` and `CARIK_DATABASE`
    pub fn apply_env(&mut self) {
        if let Ok(dirs) = std::env::var("CARIK_PLUGIN_DIR") {
            self.plugins.directories = std::env::split_paths(&dirs).collect();
        }

        if let Ok(path) = std::env::var("CARIK_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
    }

    /// Write as YAML, refusing to overwrite an existing file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::InvalidValue(format!(
                "{} already exists",
                path.display()
            )));
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, yaml)
            .map_err(|e| ConfigError::Parse(format!("Failed to write config: {}", e)))
    }
}
