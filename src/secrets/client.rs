//! Core secret store trait and types.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::error::{Result, SecretsError};
use super::types::SecretBytes;

/// Data entry holding a PEM-encoded CA certificate.
pub const CA_CERT_KEY: &str = "ca.crt";

/// Data entry holding a PEM-encoded private key.
pub const PRIVATE_KEY_KEY: &str = "private.key";

/// The data entries of one secret, keyed by entry name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretData {
    entries: BTreeMap<String, SecretBytes>,
}

impl SecretData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous value under the same key.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<SecretBytes>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&SecretBytes> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trait for secret storage backends.
///
/// Secrets are addressed by `(namespace, name)` and hold a small map of named
/// byte entries, mirroring how cluster secrets are shaped.
///
/// # Security Considerations
///
/// - Implementations MUST NOT log secret values
/// - Errors MUST NOT embed secret values
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Retrieve a secret.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`] if the secret doesn't exist
    /// - [`SecretsError::ConnectionFailed`] if the backend is unreachable
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretData>;

    /// Store a new secret.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::AlreadyExists`] if a secret with this name exists. Two
    ///   control-plane replicas racing to create a root must not both win.
    async fn create_secret(&self, namespace: &str, name: &str, data: SecretData) -> Result<()>;

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`] if the secret doesn't exist
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Check if a secret exists.
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get_secret(namespace, name).await {
            Ok(_) => Ok(true),
            Err(SecretsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Retrieve a single entry of a secret.
    async fn get_secret_entry(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<SecretBytes> {
        let data = self.get_secret(namespace, name).await?;
        data.get(key).cloned().ok_or_else(|| SecretsError::missing_key(namespace, name, key))
    }
}
