//! In-memory secret store.
//!
//! Holds secrets in a process-local map. Used by tests and by single-replica
//! deployments that do not persist the internal authority's root.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::client::{SecretData, SecretStore};
use super::error::{Result, SecretsError};

/// In-memory [`SecretStore`] implementation.
///
/// # Thread Safety
///
/// Uses a `RwLock` and can be shared across async tasks; clones share the
/// same underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<(String, String), SecretData>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretData> {
        let secrets = self.secrets.read().await;
        secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| SecretsError::not_found(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, name: &str, data: SecretData) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        let k = key(namespace, name);
        if secrets.contains_key(&k) {
            return Err(SecretsError::already_exists(namespace, name));
        }
        secrets.insert(k, data);
        tracing::debug!(namespace = %namespace, name = %name, "Stored secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| SecretsError::not_found(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{CA_CERT_KEY, PRIVATE_KEY_KEY};

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySecretStore::new();
        let data = SecretData::new().with_entry(CA_CERT_KEY, "cert");

        store.create_secret("mesh-system", "root", data.clone()).await.unwrap();
        assert_eq!(store.get_secret("mesh-system", "root").await.unwrap(), data);
        assert!(store.secret_exists("mesh-system", "root").await.unwrap());
        assert!(!store.secret_exists("other", "root").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_rejects_existing() {
        let store = InMemorySecretStore::new();
        store.create_secret("ns", "root", SecretData::new()).await.unwrap();

        let err = store.create_secret("ns", "root", SecretData::new()).await.unwrap_err();
        assert!(matches!(err, SecretsError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_entry_missing_key() {
        let store = InMemorySecretStore::new();
        store
            .create_secret("ns", "root", SecretData::new().with_entry(CA_CERT_KEY, "cert"))
            .await
            .unwrap();

        let entry = store.get_secret_entry("ns", "root", CA_CERT_KEY).await.unwrap();
        assert_eq!(entry.expose_str(), Some("cert"));

        let err = store.get_secret_entry("ns", "root", PRIVATE_KEY_KEY).await.unwrap_err();
        assert!(matches!(err, SecretsError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemorySecretStore::new();
        store.create_secret("ns", "root", SecretData::new()).await.unwrap();
        store.delete_secret("ns", "root").await.unwrap();

        assert!(store.is_empty().await);
        let err = store.delete_secret("ns", "root").await.unwrap_err();
        assert!(matches!(err, SecretsError::NotFound { .. }));
    }
}
