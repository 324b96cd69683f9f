//! Backend error types
//!
//! Error definitions with pass-level (fatal) and per-item classification.

use thiserror::Error;

/// Error that can occur while reading desired state or talking to a backend.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connectivity errors (fatal to a pass during scanning)
    /// Failed to establish or keep a connection to a directory, registry or backend.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A call did not complete within its bound.
    #[error("{operation} timed out after {timeout_secs} seconds")]
    ConnectionTimeout { operation: String, timeout_secs: u64 },

    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    // Lookup errors (fatal to the operation that issued them)
    /// A lookup that required exactly one match found none.
    #[error("{kind} not found: {identifier}")]
    NotFound { kind: String, identifier: String },

    /// A lookup that required exactly one match found several.
    #[error("ambiguous {kind} '{identifier}': {count} matches")]
    AmbiguousResult {
        kind: String,
        identifier: String,
        count: usize,
    },

    // Schema drift (fatal)
    /// A named column is missing from the allocation registry.
    #[error("field '{field}' not found (available: {available})")]
    FieldNotFound { field: String, available: String },

    // Backend command errors (per item)
    /// An external command exited non-zero.
    #[error("command `{command}` failed with status {status}: {stderr}")]
    BackendCommand {
        command: String,
        status: i32,
        stderr: String,
    },

    /// An external command produced output of an unexpected shape.
    #[error("unexpected output from `{command}`: {message}")]
    UnexpectedOutput { command: String, message: String },

    /// A backend refused a corrective action.
    #[error("{backend} rejected change to {target}: {message}")]
    Rejected {
        backend: String,
        target: String,
        message: String,
    },

    // Configuration errors (fatal)
    /// Configuration is invalid or a requested capability is not configured.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Invalid data format.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Local I/O failure.
    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error invalidates the whole pass.
    ///
    /// Connectivity failures, registry schema drift and configuration errors
    /// mean the desired or actual state cannot be trusted, so the pass stops.
    /// Everything else is folded into the failed set of the item it concerns.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::ConnectionTimeout { .. }
                | ConnectorError::AuthenticationFailed
                | ConnectorError::FieldNotFound { .. }
                | ConnectorError::InvalidConfiguration { .. }
        )
    }

    /// Check if this error is transient and a later pass may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. } | ConnectorError::ConnectionTimeout { .. }
        )
    }

    /// Get an error code for classification in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::NotFound { .. } => "NOT_FOUND",
            ConnectorError::AmbiguousResult { .. } => "AMBIGUOUS_RESULT",
            ConnectorError::FieldNotFound { .. } => "FIELD_NOT_FOUND",
            ConnectorError::BackendCommand { .. } => "BACKEND_COMMAND",
            ConnectorError::UnexpectedOutput { .. } => "UNEXPECTED_OUTPUT",
            ConnectorError::Rejected { .. } => "REJECTED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::Io { .. } => "IO_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        ConnectorError::NotFound {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Create an ambiguous-result error.
    pub fn ambiguous(kind: impl Into<String>, identifier: impl Into<String>, count: usize) -> Self {
        ConnectorError::AmbiguousResult {
            kind: kind.into(),
            identifier: identifier.into(),
            count,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an I/O error with source.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        ConnectorError::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for backend operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
