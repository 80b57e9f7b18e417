//! Error types for the Z-Wave JS integration

use std::path::PathBuf;
use thiserror::Error;

use crate::consts::reason;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading the integration configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Why probing a Z-Wave JS server failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Not a `ws://` or `wss://` URL; no connection was attempted
    #[error("invalid websocket url '{0}'")]
    InvalidAddress(String),

    /// Timeout, transport or protocol failure
    #[error("cannot connect: {0}")]
    CannotConnect(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl ProbeError {
    /// Form error code for this failure
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::InvalidAddress(_) => reason::INVALID_WS_URL,
            ProbeError::CannotConnect(_) => reason::CANNOT_CONNECT,
            ProbeError::Unknown(_) => reason::UNKNOWN,
        }
    }
}

/// Errors from the supervisor add-on API
#[derive(Debug, Error)]
pub enum AddonError {
    /// The supervisor answered with an error envelope
    #[error("supervisor error during {operation}: {message}")]
    Api { operation: String, message: String },

    #[error("supervisor request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The add-on has not published discovery info
    #[error("no discovery info for add-on {0}")]
    MissingDiscoveryInfo(String),

    /// The started add-on never became reachable
    #[error("add-on not reachable after {rounds} rounds")]
    SetupTimeout { rounds: u32 },

    /// A background add-on task panicked or was cancelled
    #[error("add-on task did not complete: {0}")]
    TaskFailed(String),
}

impl AddonError {
    pub fn api(operation: &str, message: impl Into<String>) -> Self {
        AddonError::Api {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}
