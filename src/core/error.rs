//! Error types and result handling for ferroscan.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ferroscan operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Signature database errors =====
    #[error("Malformed signature in {path} (line {line}): {reason}")]
    MalformedSignature {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Duplicate signature name: {0}")]
    DuplicateSignature(String),

    #[error("Unsupported database extension: {path}")]
    UnsupportedDatabase { path: PathBuf },

    #[error("Failed to read signature database: {path}")]
    DatabaseRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===== Scanning errors =====
    #[error("Failed to read scan target: {path}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt container in layer {layer}: {reason}")]
    CorruptContainer { layer: String, reason: String },

    #[error("Recursion limit ({limit}) exceeded at layer {layer}")]
    RecursionLimitExceeded { layer: String, limit: usize },

    #[error("Bytecode evaluation failed for {signature}: {reason}")]
    BytecodeEvaluationFailure { signature: String, reason: String },

    // ===== Configuration errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Serialization errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a malformed signature error.
    pub fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedSignature {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Create an unreadable input error.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::UnreadableInput {
            path: path.into(),
            source,
        }
    }

    /// Create a corrupt container error.
    pub fn corrupt_container(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptContainer {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable (the scan can continue).
    ///
    /// Container faults, recursion limits and bytecode failures are absorbed
    /// where they occur; only unreadable input and database/config failures
    /// abort a session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CorruptContainer { .. }
                | Error::RecursionLimitExceeded { .. }
                | Error::BytecodeEvaluationFailure { .. }
        )
    }
}
