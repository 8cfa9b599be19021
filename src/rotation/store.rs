//! Persistence of `MeshRootCertificate` objects.
//!
//! Writes carry the resource version they were based on. A store rejects a
//! write whose version is stale with [`StoreError::Conflict`], which is how
//! concurrent reconciles of the same object are serialized.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::{MeshRootCertificate, MeshRootCertificateList};
use crate::errors::StoreError;

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait RootCertificateStore: Send + Sync + std::fmt::Debug {
    /// Get an object by name.
    async fn get(&self, name: &str) -> Result<Option<MeshRootCertificate>, StoreError>;

    /// List every object.
    async fn list(&self) -> Result<MeshRootCertificateList, StoreError>;

    /// Create a new object. Fails with a conflict if the name is taken.
    async fn create(&self, object: MeshRootCertificate)
        -> Result<MeshRootCertificate, StoreError>;

    /// Replace an object.
    ///
    /// `object.metadata.resource_version` must equal the stored version;
    /// otherwise [`StoreError::Conflict`] is returned and nothing is written.
    async fn update(&self, object: MeshRootCertificate)
        -> Result<MeshRootCertificate, StoreError>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// Process-local [`RootCertificateStore`] with a monotonically increasing
/// resource version.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRootStore {
    objects: Arc<RwLock<BTreeMap<String, MeshRootCertificate>>>,
    version: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    injected_conflicts: Arc<AtomicU32>,
}

impl InMemoryRootStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create and update calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` updates fail with a conflict, as if another
    /// writer had modified the object in between.
    pub fn conflict_next(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RootCertificateStore for InMemoryRootStore {
    async fn get(&self, name: &str) -> Result<Option<MeshRootCertificate>, StoreError> {
        Ok(self.objects.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<MeshRootCertificateList, StoreError> {
        let objects = self.objects.read().await;
        let items = objects.values().cloned().collect();
        Ok(MeshRootCertificateList::new(items, self.version.load(Ordering::SeqCst).to_string()))
    }

    #[instrument(skip(self, object), fields(name = %object.name()), name = "store_create_root")]
    async fn create(
        &self,
        mut object: MeshRootCertificate,
    ) -> Result<MeshRootCertificate, StoreError> {
        let mut objects = self.objects.write().await;
        if let Some(existing) = objects.get(object.name()) {
            return Err(StoreError::Conflict {
                name: object.name().to_string(),
                expected: String::new(),
                actual: existing.metadata.resource_version.clone(),
            });
        }

        object.metadata.resource_version = self.next_version();
        objects.insert(object.name().to_string(), object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }

    #[instrument(skip(self, object), fields(name = %object.name()), name = "store_update_root")]
    async fn update(
        &self,
        mut object: MeshRootCertificate,
    ) -> Result<MeshRootCertificate, StoreError> {
        let mut objects = self.objects.write().await;
        let stored =
            objects.get(object.name()).ok_or_else(|| StoreError::not_found(object.name()))?;

        let actual = stored.metadata.resource_version.clone();
        if self.take_injected_conflict() || actual != object.metadata.resource_version {
            return Err(StoreError::Conflict {
                name: object.name().to_string(),
                expected: object.metadata.resource_version.clone(),
                actual,
            });
        }

        object.metadata.resource_version = self.next_version();
        objects.insert(object.name().to_string(), object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            name = %object.name(),
            resource_version = %object.metadata.resource_version,
            "Updated root certificate object"
        );
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSpec;

    fn object(name: &str) -> MeshRootCertificate {
        MeshRootCertificate::new(name, ProviderSpec::default())
    }

    #[tokio::test]
    async fn test_create_assigns_version() {
        let store = InMemoryRootStore::new();
        let created = store.create(object("mesh-root")).await.unwrap();

        assert_eq!(created.metadata.resource_version, "1");
        assert_eq!(store.get("mesh-root").await.unwrap(), Some(created));
        assert_eq!(store.writes(), 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = InMemoryRootStore::new();
        let created = store.create(object("mesh-root")).await.unwrap();

        let mut first = created.clone();
        first.status.state = "init".to_string();
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.metadata.resource_version, "2");

        let err = store.update(created).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                name: "mesh-root".to_string(),
                expected: "1".to_string(),
                actual: "2".to_string()
            }
        );
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = InMemoryRootStore::new();
        let created = store.create(object("mesh-root")).await.unwrap();
        store.conflict_next(1);

        assert!(store.update(created.clone()).await.unwrap_err().is_conflict());
        assert!(store.update(created).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let store = InMemoryRootStore::new();
        let err = store.update(object("mesh-root")).await.unwrap_err();
        assert_eq!(err, StoreError::not_found("mesh-root"));

        store.create(object("b")).await.unwrap();
        store.create(object("a")).await.unwrap();
        let list = store.list().await.unwrap();
        let names: Vec<_> = list.items.iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
