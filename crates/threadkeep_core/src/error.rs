use std::path::Path;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::StreamId;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Record store unavailable: {operation} failed")]
    #[diagnostic(
        code(threadkeep_core::store_unavailable),
        help("The remote record store rejected or dropped the request: {cause}")
    )]
    StoreUnavailable {
        operation: String,
        stream_id: Option<StreamId>,
        cause: String,
    },

    #[error("Document '{document}' is not well-formed")]
    #[diagnostic(
        code(threadkeep_core::validation_failure),
        help("The submitted text must parse as a JSON document: {details}")
    )]
    ValidationFailure { document: String, details: String },

    #[error("{subject} exceeds the size limit ({actual} > {limit})")]
    #[diagnostic(
        code(threadkeep_core::size_limit_exceeded),
        help("Shorten {subject} to at most {limit} characters")
    )]
    SizeLimitExceeded {
        subject: String,
        limit: usize,
        actual: usize,
    },

    #[error("Document '{document}' changed on both sides since the last sync")]
    #[diagnostic(
        code(threadkeep_core::reconciliation_conflict),
        help("Pick an authoritative side with lock/unlock and run initialize again")
    )]
    ReconciliationConflict { document: String },

    #[error("Document not found: {name}")]
    #[diagnostic(
        code(threadkeep_core::document_not_found),
        help("Call initialize(\"{name}\") before reading or editing the document")
    )]
    DocumentNotFound { name: String },

    #[error("Concurrent initialize of '{document}' failed: {cause}")]
    #[diagnostic(
        code(threadkeep_core::concurrent_initialize),
        help("Another caller's in-flight initialize failed; the next call retries")
    )]
    ConcurrentInitialize { document: String, cause: String },

    #[error("IO error: {operation} failed for {path}")]
    #[diagnostic(
        code(threadkeep_core::io_error),
        help("Check file permissions and disk space")
    )]
    IoError {
        operation: String,
        path: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(threadkeep_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(threadkeep_core::configuration_error),
        help("Check configuration file at {config_path}\nExpected: {expected}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn store_unavailable(
        operation: impl Into<String>,
        stream_id: Option<StreamId>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            stream_id,
            cause: cause.to_string(),
        }
    }

    pub fn validation(document: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::ValidationFailure {
            document: document.into(),
            details: details.to_string(),
        }
    }

    pub fn size_limit(subject: impl Into<String>, limit: usize, actual: usize) -> Self {
        Self::SizeLimitExceeded {
            subject: subject.into(),
            limit,
            actual,
        }
    }

    pub fn io(operation: impl Into<String>, path: &Path, cause: std::io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            path: path.display().to_string(),
            cause,
        }
    }

    pub fn serialization(data_type: impl Into<String>, cause: serde_json::Error) -> Self {
        Self::SerializationError {
            data_type: data_type.into(),
            cause,
        }
    }

    /// Recover the error produced by a shared in-flight future.
    ///
    /// The last holder gets the original error back. Other holders get a copy
    /// of the same kind; only errors wrapping a non-cloneable source collapse
    /// into `ConcurrentInitialize` carrying its message.
    pub fn from_shared(document: &str, shared: Arc<CoreError>) -> Self {
        let shared = match Arc::try_unwrap(shared) {
            Ok(err) => return err,
            Err(shared) => shared,
        };
        match &*shared {
            CoreError::StoreUnavailable {
                operation,
                stream_id,
                cause,
            } => CoreError::StoreUnavailable {
                operation: operation.clone(),
                stream_id: *stream_id,
                cause: cause.clone(),
            },
            CoreError::ValidationFailure { document, details } => CoreError::ValidationFailure {
                document: document.clone(),
                details: details.clone(),
            },
            CoreError::SizeLimitExceeded {
                subject,
                limit,
                actual,
            } => CoreError::size_limit(subject.clone(), *limit, *actual),
            CoreError::ReconciliationConflict { document } => CoreError::ReconciliationConflict {
                document: document.clone(),
            },
            CoreError::DocumentNotFound { name } => CoreError::DocumentNotFound { name: name.clone() },
            CoreError::ConcurrentInitialize { document, cause } => {
                CoreError::ConcurrentInitialize {
                    document: document.clone(),
                    cause: cause.clone(),
                }
            }
            other => CoreError::ConcurrentInitialize {
                document: document.to_string(),
                cause: other.to_string(),
            },
        }
    }

    /// Whether this error came from the remote store rather than local state.
    pub fn is_store_error(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable { .. })
    }
}
