//! # Error Types
//!
//! Crate-wide error type and the configuration error category.

use thiserror::Error;

use super::certificate::{DecodeError, IssuanceError};
use super::cluster::{ConflictError, StoreError, SyncTimeoutError};
use crate::secrets::SecretsError;

/// Custom result type for meshplane operations
pub type Result<T> = std::result::Result<T, MeshplaneError>;

/// Malformed or contradictory mesh configuration.
///
/// Always fatal: the process must not proceed with an undefined provider.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// None of the provider sections is populated.
    #[error("No certificate provider configured: exactly one of certManager, vault, tresor is required")]
    NoProvider,

    /// More than one provider section is populated.
    #[error("Multiple certificate providers configured ({}): exactly one is allowed", providers.join(", "))]
    MultipleProviders { providers: Vec<&'static str> },

    /// A required field of the selected provider is missing or empty.
    #[error("Provider '{provider}' is missing required field '{field}'")]
    MissingField { provider: &'static str, field: &'static str },

    /// A field holds a value outside its accepted domain.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// The configuration sources could not be read or deserialized.
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ::config::ConfigError),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::invalid(format!("Validation failed: {}", message))
    }
}

/// Main error type for meshplane
#[derive(Debug, Error)]
pub enum MeshplaneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    SyncTimeout(#[from] SyncTimeoutError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// Internal invariant violations
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MeshplaneError {
    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            MeshplaneError::Issuance(e) => e.is_retryable(),
            MeshplaneError::SyncTimeout(_) => true,
            MeshplaneError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MultipleProviders { providers: vec!["vault", "tresor"] };
        assert_eq!(
            err.to_string(),
            "Multiple certificate providers configured (vault, tresor): exactly one is allowed"
        );

        let err = ConfigError::MissingField { provider: "vault", field: "role" };
        assert_eq!(err.to_string(), "Provider 'vault' is missing required field 'role'");
    }

    #[test]
    fn test_error_conversions() {
        let err: MeshplaneError = DecodeError::MissingCommonName.into();
        assert!(matches!(err, MeshplaneError::Decode(_)));

        let err: MeshplaneError = ConfigError::NoProvider.into();
        assert!(matches!(err, MeshplaneError::Config(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        let err: MeshplaneError = IssuanceError::unavailable("vault", "timeout").into();
        assert!(err.is_retryable());

        let err: MeshplaneError =
            SyncTimeoutError { kinds: "services".to_string(), timeout: Duration::from_secs(3) }
                .into();
        assert!(err.is_retryable());

        let err: MeshplaneError = ConflictError { name: "root".to_string(), attempts: 5 }.into();
        assert!(!err.is_retryable());
    }
}
