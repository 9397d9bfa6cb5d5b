//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the module manager.
///
/// Only `PermissionDenied` and `NotFound` are meant to reach the caller
/// untouched; everything else is caught at the module it concerns and turned
/// into a report line.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid metadata: {0}")]
    Validation(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("State of module {pack} is pinned to {pinned}")]
    PinnedState { pack: String, pinned: bool },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Activation failed: {0}")]
    Activation(String),

    #[error("Failed to install requirements: {0}")]
    Requirements(String),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("At least one search criterion is required")]
    EmptySearch,

    #[error("Interrupted swap left {0} absent")]
    CorruptSwap(String),
}

/// Hub (remote registry) errors
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Hub service is not enabled")]
    NotEnabled,

    #[error("Not authorized with the hub")]
    Unauthorized,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
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
