use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Public error taxonomy for a failed operation.
///
/// The discriminants are the numeric codes the JavaScript side of the bridge
/// expects in `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unknown = 0,
    Database = 1,
    Version = 2,
    TooLarge = 3,
    Quota = 4,
    Syntax = 5,
    Constraint = 6,
    Timeout = 7,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Errors raised by connection lifecycle calls.
///
/// These are never folded into a batch result; they go straight back to
/// whoever called `open`, `close`, `delete` or submitted the batch.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("could not open database {id}: {reason}")]
    Open { id: String, reason: String },

    #[error("database {0} is closed")]
    Closed(String),

    #[error("database {id} is in use by {other}")]
    InUse { id: String, other: String },

    #[error("database {0} not found")]
    NotFound(String),

    #[error("could not delete database {id}: {reason}")]
    Delete { id: String, reason: String },
}

impl RegistryError {
    /// Stable short code used on the bridge.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Open { .. } => "open",
            RegistryError::Closed(_) => "closed",
            RegistryError::InUse { .. } => "in_use",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Delete { .. } => "delete",
        }
    }
}

/// Failure reported by the embedded engine.
///
/// `code` is the SQLite result code, extended when SQLite reported one, or
/// -1 when the fault did not come from SQLite itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid database location: {0}")]
    Location(String),
}

/// Errors returned by the bridge dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("self test failed: {0}")]
    SelfTest(String),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Registry(e) => e.code(),
            DispatchError::Invalid(_) => "invalid",
            DispatchError::SelfTest(_) => "self_test",
        }
    }
}
