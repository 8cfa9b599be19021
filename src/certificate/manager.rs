//! # Certificate Manager
//!
//! Caches one certificate per common name, issues through the active provider,
//! and renews entries before they expire.
//!
//! Issuance for a single common name is mutually exclusive: concurrent callers
//! asking for the same name share one provider call. Two live certificates for
//! one identity are never produced by this manager.
//!
//! Releasing a name bumps its release generation. An issuance that started
//! before the release still returns its certificate to the caller but does not
//! cache it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, Instrument};

use super::jitter::{JitterSource, RandomJitter};
use super::providers::CertificateIssuer;
use super::types::{Certificate, CommonName, RootCertificate};
use crate::errors::IssuanceError;
use crate::observability::{log_error, ErrorCode, MetricsRecorder};

/// Capacity of the rotation broadcast channel.
const ROTATION_CHANNEL_CAPACITY: usize = 128;

/// Renewals in flight at once during a sweep.
const RENEWAL_CONCURRENCY: usize = 8;

/// Per-name issuance lock and release generation.
#[derive(Debug, Default)]
struct Slot {
    issuing: Mutex<()>,
    released: AtomicU64,
}

impl Slot {
    fn generation(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct IssuedEntry {
    certificate: Arc<Certificate>,
    validity: Duration,
}

/// Outcome of one renewal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSummary {
    /// Entries found inside their renewal window
    pub due: usize,
    pub rotated: usize,
    pub failed: usize,
}

struct ManagerInner {
    provider: Arc<dyn CertificateIssuer>,
    cache: DashMap<CommonName, IssuedEntry>,
    slots: DashMap<CommonName, Arc<Slot>>,
    jitter: Arc<dyn JitterSource>,
    rotations: broadcast::Sender<Arc<Certificate>>,
    metrics: MetricsRecorder,
}

/// Issues, caches, and renews workload certificates.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct CertificateManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("provider", &self.inner.provider.kind())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

impl CertificateManager {
    pub fn new(provider: Arc<dyn CertificateIssuer>) -> Self {
        Self::with_jitter(provider, Arc::new(RandomJitter))
    }

    /// Create a manager drawing renewal noise from `jitter`.
    pub fn with_jitter(
        provider: Arc<dyn CertificateIssuer>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let (rotations, _) = broadcast::channel(ROTATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                provider,
                cache: DashMap::new(),
                slots: DashMap::new(),
                jitter,
                rotations,
                metrics: MetricsRecorder::new(),
            }),
        }
    }

    /// Return the cached certificate for `common_name` if it is not due for
    /// renewal, otherwise issue a new one.
    #[instrument(skip(self), fields(common_name = %common_name))]
    pub async fn issue_certificate(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Arc<Certificate>, IssuanceError> {
        let seen = self.cached(common_name);
        if let Some(cert) = &seen {
            if !cert.should_rotate_with(self.inner.jitter.as_ref()) {
                return Ok(Arc::clone(cert));
            }
        }

        let slot = self.slot_for(common_name);
        let _guard = slot.issuing.lock().await;
        let generation = slot.generation();

        // Another caller may have issued while we waited for the lock.
        if let Some(current) = self.cached(common_name) {
            let replaced = match &seen {
                Some(seen) => !Arc::ptr_eq(seen, &current),
                None => true,
            };
            if replaced || !current.should_rotate_with(self.inner.jitter.as_ref()) {
                return Ok(current);
            }
        }

        let provider = self.inner.provider.kind();
        let issuance = self
            .inner
            .provider
            .issue(common_name, validity)
            .instrument(crate::issuance_span!(provider, common_name));
        let certificate = match issuance.await {
            Ok(certificate) => Arc::new(certificate),
            Err(e) => {
                log_error(ErrorCode::IssuanceFailed, &e, "Error issuing certificate");
                return Err(e);
            }
        };

        self.inner.metrics.record_certificate_issued(provider.as_str());
        if slot.generation() != generation {
            debug!(
                serial_number = %certificate.serial_number(),
                "Certificate released during issuance, not caching"
            );
            return Ok(certificate);
        }
        self.inner.cache.insert(
            common_name.clone(),
            IssuedEntry { certificate: Arc::clone(&certificate), validity },
        );
        self.inner.metrics.set_cached_certificates(self.inner.cache.len());

        debug!(
            serial_number = %certificate.serial_number(),
            expiration = %certificate.expiration(),
            "Issued certificate"
        );
        Ok(certificate)
    }

    /// Re-issue every cached certificate that is inside its renewal window.
    ///
    /// Up to a fixed number of entries renew concurrently, so one slow
    /// provider call does not hold up the rest. A failure for one entry is
    /// logged and left for the next sweep.
    pub async fn rotate_expiring(&self) -> RotationSummary {
        let jitter = self.inner.jitter.as_ref();
        let due: Vec<(CommonName, IssuedEntry)> = self
            .inner
            .cache
            .iter()
            .filter(|entry| entry.value().certificate.should_rotate_with(jitter))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut summary = RotationSummary { due: due.len(), ..Default::default() };

        let outcomes: Vec<Option<bool>> = futures::stream::iter(due)
            .map(|(common_name, seen)| self.rotate_entry(common_name, seen))
            .buffer_unordered(RENEWAL_CONCURRENCY)
            .collect()
            .await;
        for outcome in outcomes.into_iter().flatten() {
            if outcome {
                summary.rotated += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }

    /// Renew one entry. `None` if it was released or re-issued since the
    /// sweep's snapshot, otherwise whether the renewal succeeded.
    async fn rotate_entry(&self, common_name: CommonName, seen: IssuedEntry) -> Option<bool> {
        let slot = self.slot_for(&common_name);
        let _guard = slot.issuing.lock().await;

        match self.cached(&common_name) {
            Some(current) if Arc::ptr_eq(&current, &seen.certificate) => {}
            _ => return None,
        }

        let issuance = self
            .inner
            .provider
            .issue(&common_name, seen.validity)
            .instrument(crate::issuance_span!(self.inner.provider.kind(), common_name));
        match issuance.await {
            Ok(certificate) => {
                let certificate = Arc::new(certificate);
                if !self.replace_if_current(&common_name, &seen.certificate, &certificate) {
                    return None;
                }
                self.inner.metrics.record_certificate_rotation(true);
                // No receivers is fine.
                let _ = self.inner.rotations.send(Arc::clone(&certificate));
                debug!(
                    common_name = %common_name,
                    old_serial = %seen.certificate.serial_number(),
                    new_serial = %certificate.serial_number(),
                    "Rotated certificate"
                );
                Some(true)
            }
            Err(e) => {
                self.inner.metrics.record_certificate_rotation(false);
                log_error(
                    ErrorCode::RotationFailed,
                    &e,
                    &format!("Error rotating certificate {}", common_name),
                );
                Some(false)
            }
        }
    }

    /// Spawn the renewal loop. It sweeps every `interval` until `cancel` fires;
    /// a sweep in progress when cancellation arrives runs to completion.
    pub fn start(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Certificate renewal loop started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Certificate renewal loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let summary = manager.rotate_expiring().await;
                        if summary.due > 0 {
                            info!(
                                due = summary.due,
                                rotated = summary.rotated,
                                failed = summary.failed,
                                "Certificate renewal sweep finished"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Forget the certificate for `common_name`. No effect if absent.
    ///
    /// An issuance already running for the name keeps its lock, so a caller
    /// arriving after the release still waits for it.
    pub fn release_certificate(&self, common_name: &CommonName) {
        if let Some(slot) = self.inner.slots.get(common_name) {
            slot.released.fetch_add(1, Ordering::SeqCst);
        }
        if self.inner.cache.remove(common_name).is_some() {
            debug!(common_name = %common_name, "Released certificate");
        }
        // Only drop a slot nobody else holds. Clones are taken under the
        // same shard lock, so none can appear during the check.
        self.inner.slots.remove_if(common_name, |_, slot| Arc::strong_count(slot) == 1);
        self.inner.metrics.set_cached_certificates(self.inner.cache.len());
    }

    /// Receive every certificate replaced by the renewal loop.
    pub fn subscribe_rotations(&self) -> broadcast::Receiver<Arc<Certificate>> {
        self.inner.rotations.subscribe()
    }

    pub fn get_certificate(&self, common_name: &CommonName) -> Option<Arc<Certificate>> {
        self.cached(common_name)
    }

    /// Common names with a cached certificate, sorted.
    pub fn list_issued(&self) -> Vec<CommonName> {
        let mut names: Vec<CommonName> =
            self.inner.cache.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Root certificate of the active provider.
    pub async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError> {
        self.inner.provider.root_certificate().await
    }

    fn cached(&self, common_name: &CommonName) -> Option<Arc<Certificate>> {
        self.inner.cache.get(common_name).map(|entry| Arc::clone(&entry.certificate))
    }

    fn slot_for(&self, common_name: &CommonName) -> Arc<Slot> {
        Arc::clone(&self.inner.slots.entry(common_name.clone()).or_default())
    }

    /// Swap in `replacement` only if the entry still holds `current`.
    fn replace_if_current(
        &self,
        common_name: &CommonName,
        current: &Arc<Certificate>,
        replacement: &Arc<Certificate>,
    ) -> bool {
        match self.inner.cache.get_mut(common_name) {
            Some(mut entry) if Arc::ptr_eq(&entry.certificate, current) => {
                entry.certificate = Arc::clone(replacement);
                true
            }
            _ => false,
        }
    }
}
