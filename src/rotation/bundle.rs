//! The set of root certificates peers currently trust.
//!
//! During dual trust the bundle holds both the outgoing and the incoming root.
//! Consumers read [`TrustBundle::pem_bundle`] and re-read it whenever a version
//! is published on [`TrustBundle::subscribe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::certificate::{RootCertificate, SerialNumber};

#[derive(Debug)]
struct BundleInner {
    roots: RwLock<Vec<RootCertificate>>,
    version: AtomicU64,
    update_tx: broadcast::Sender<u64>,
}

/// Shared, cloneable trust bundle.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    inner: Arc<BundleInner>,
}

impl Default for TrustBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustBundle {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self {
            inner: Arc::new(BundleInner {
                roots: RwLock::new(Vec::new()),
                version: AtomicU64::new(0),
                update_tx,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RootCertificate>> {
        self.inner.roots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RootCertificate>> {
        self.inner.roots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self) {
        let version = self.inner.version.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.inner.update_tx.send(version);
    }

    /// Add a root. Returns `false` if a root with the same serial is present.
    pub fn add(&self, root: RootCertificate) -> bool {
        {
            let mut roots = self.write();
            if roots.iter().any(|r| r.serial_number() == root.serial_number()) {
                return false;
            }
            tracing::info!(serial = %root.serial_number(), "Adding root to trust bundle");
            roots.push(root);
        }
        self.publish();
        true
    }

    /// Remove the root with `serial`. Returns whether it was present.
    pub fn remove(&self, serial: &SerialNumber) -> bool {
        let removed = {
            let mut roots = self.write();
            let before = roots.len();
            roots.retain(|r| r.serial_number() != serial);
            roots.len() != before
        };
        if removed {
            tracing::info!(serial = %serial, "Removed root from trust bundle");
            self.publish();
        }
        removed
    }

    /// Keep only the root with `serial`. Returns the number of roots dropped.
    pub fn retire_all_except(&self, serial: &SerialNumber) -> usize {
        let retired = {
            let mut roots = self.write();
            let before = roots.len();
            roots.retain(|r| r.serial_number() == serial);
            before - roots.len()
        };
        if retired > 0 {
            tracing::info!(kept = %serial, retired, "Retired old roots from trust bundle");
            self.publish();
        }
        retired
    }

    /// Make the bundle hold exactly `roots`, deduplicated by serial. A version
    /// is published only if the set of serials changed.
    pub fn replace(&self, roots: Vec<RootCertificate>) -> bool {
        let mut unique: Vec<RootCertificate> = Vec::with_capacity(roots.len());
        for root in roots {
            if !unique.iter().any(|r| r.serial_number() == root.serial_number()) {
                unique.push(root);
            }
        }

        {
            let mut current = self.write();
            let held = |root: &RootCertificate| {
                current.iter().any(|r| r.serial_number() == root.serial_number())
            };
            let same = current.len() == unique.len() && unique.iter().all(held);
            if same {
                return false;
            }
            let serials: Vec<&str> = unique.iter().map(|r| r.serial_number().as_str()).collect();
            tracing::info!(serials = ?serials, "Replacing trusted roots");
            *current = unique;
        }
        self.publish();
        true
    }

    pub fn contains(&self, serial: &SerialNumber) -> bool {
        self.read().iter().any(|r| r.serial_number() == serial)
    }

    /// Snapshot of the trusted roots in insertion order.
    pub fn roots(&self) -> Vec<RootCertificate> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Concatenated PEM of every trusted root.
    pub fn pem_bundle(&self) -> String {
        let roots = self.read();
        let mut bundle = String::new();
        for root in roots.iter() {
            bundle.push_str(root.pem().trim_end());
            bundle.push('\n');
        }
        bundle
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    /// Receive the new bundle version after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.inner.update_tx.subscribe()
    }
}
