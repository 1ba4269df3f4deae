//! Error types for the roller library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Comprehensive error type for all rollout operations.
#[derive(Error, Debug)]
pub enum RollerError {
    /// Invalid input validation errors
    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },
    /// A plan record, agent or target could not be found
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    /// Version mismatch on a conditional write. Only surfaced once the retry
    /// budget is spent.
    #[error("Conflicting update on record '{name}' after {attempts} attempt(s)")]
    Conflict { name: String, attempts: u32 },
    /// Persisted payload could not be parsed
    #[error("Failed to decode record '{name}': {reason}")]
    Decode { name: String, reason: String },
    /// Remote command failed or its stream broke
    #[error("Execution failed on node '{node}': {reason}")]
    ExecutionFailure { node: String, reason: String },
    /// Operator aborted the run
    #[error("Operation cancelled")]
    Cancelled,
    /// Backing store errors
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Serialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Builder for creating storage errors with optional context.
pub struct StorageErrorBuilder {
    message: String,
}

impl StorageErrorBuilder {
    /// Create a new storage error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: rusqlite::Error) -> RollerError {
        RollerError::Storage {
            message: self.message,
            source,
        }
    }
}

/// Builder for creating argument validation errors.
pub struct InvalidArgumentBuilder {
    field: String,
}

impl InvalidArgumentBuilder {
    /// Create a new invalid argument error builder for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Build the error with the given reason.
    pub fn with_reason(self, reason: impl Into<String>) -> RollerError {
        RollerError::InvalidArgument {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl RollerError {
    /// Creates a builder for storage errors.
    pub fn storage(message: impl Into<String>) -> StorageErrorBuilder {
        StorageErrorBuilder::new(message)
    }

    /// Creates a builder for argument validation errors.
    pub fn invalid_argument(field: impl Into<String>) -> InvalidArgumentBuilder {
        InvalidArgumentBuilder::new(field)
    }

    /// Shorthand for a missing plan record.
    pub fn plan_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Plan",
            name: name.into(),
        }
    }

    /// Whether this error is a version conflict that a CAS loop may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this error is a missing record or entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Extension trait for Result to provide concise error mapping with
/// anyhow-style context.
pub trait ResultExt<T, E> {
    /// Add context to any error type, converting to RollerError.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

/// Specialized extension trait for storage-related Results.
pub trait StorageResultExt<T> {
    /// Map storage errors with a message.
    fn storage_context(self, message: &str) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| RollerError::Configuration {
            message: format!("{}: {}", context, e),
        })
    }
}

impl<T> StorageResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn storage_context(self, message: &str) -> Result<T> {
        self.map_err(|e| RollerError::storage(message).with_source(e))
    }
}

/// Result type alias for rollout operations
pub type Result<T> = std::result::Result<T, RollerError>;
