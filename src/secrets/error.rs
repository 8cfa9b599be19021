//! Error types for secret storage operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur during secret storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretsError {
    /// Secret not found in the backend.
    #[error("Secret not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    /// A secret with this name already exists.
    #[error("Secret already exists: {namespace}/{name}")]
    AlreadyExists { namespace: String, name: String },

    /// The secret exists but lacks a required data entry.
    #[error("Secret {namespace}/{name} has no '{key}' entry")]
    MissingKey { namespace: String, name: String, key: String },

    /// Failed to connect to the secrets backend.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Backend-specific error.
    #[error("Backend error: {message}")]
    BackendError { message: String },
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { namespace: namespace.into(), name: name.into() }
    }

    /// Create an already exists error.
    pub fn already_exists(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists { namespace: namespace.into(), name: name.into() }
    }

    /// Create a missing key error.
    pub fn missing_key(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::MissingKey { namespace: namespace.into(), name: name.into(), key: key.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::BackendError { message: message.into() }
    }

    /// Whether the failure is transient (the store could not be reached).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::BackendError { .. })
    }
}
