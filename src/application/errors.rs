//! Application layer errors

use std::time::Duration;
use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Lifecycle phase of a plugin call, used in error reports and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Load,
    Unload,
    Enable,
    Disable,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Load => "on_load",
            LifecyclePhase::Unload => "on_unload",
            LifecyclePhase::Enable => "on_enable",
            LifecyclePhase::Disable => "on_disable",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin runtime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Plugin '{plugin}' requires '{dependency}', which is not loaded")]
    Dependency { plugin: String, dependency: String },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Registration conflict on {what}: owned by '{existing}', also claimed by '{incoming}'")]
    RegistrationConflict {
        what: String,
        existing: String,
        incoming: String,
    },

    #[error("Plugin '{plugin}' failed in {phase}: {message}")]
    Lifecycle {
        plugin: String,
        phase: LifecyclePhase,
        message: String,
    },

    #[error("Plugin '{plugin}' timed out in {phase} after {timeout:?}")]
    Timeout {
        plugin: String,
        phase: LifecyclePhase,
        timeout: Duration,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin '{plugin}' is {state}, cannot {action}")]
    InvalidState {
        plugin: String,
        state: String,
        action: String,
    },

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("No factory registered for plugin '{0}'")]
    NoFactory(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid schema extension: {0}")]
    InvalidSchema(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PluginError {
    /// Shorthand for handler failures raised from inside plugin code
    pub fn handler(msg: impl Into<String>) -> Self {
        PluginError::Handler(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PluginError::RegistrationConflict { .. })
    }
}

impl From<StorageError> for PluginError {
    fn from(e: StorageError) -> Self {
        PluginError::Storage(e.to_string())
    }
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied")]
    PermissionDenied,
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result alias for plugin runtime operations
pub type PluginResult<T> = Result<T, PluginError>;
