//! # Root Rotation Controller
//!
//! Drives a `MeshRootCertificate` object through the transition table in
//! [`super::state`]. One reconcile step reads the object, plans the next
//! status, updates the roots recorded on the object, and writes it back only
//! if it changed. A stale write is retried against a freshly read object until
//! the conflict budget is spent.
//!
//! Roots are recorded in annotations, as two records of three keys each:
//!
//! - the issued root: [`ISSUED_PROVIDER_ANNOTATION`] (the provider
//!   configuration that issued it, serialized with credentials redacted),
//!   [`ISSUED_ROOT_ANNOTATION`] and [`ISSUED_ROOT_SERIAL_ANNOTATION`]
//! - the root it replaced while a rotation is under way:
//!   [`PREVIOUS_PROVIDER_ANNOTATION`], [`PREVIOUS_ROOT_ANNOTATION`] and
//!   [`PREVIOUS_ROOT_SERIAL_ANNOTATION`]
//!
//! The [`TrustBundle`] is derived from the committed object only, after a
//! write succeeds or when a reconcile finds nothing to do. A write that
//! conflicts leaves the bundle as it was, and a restarted controller rebuilds
//! it from whatever state the object is in. The controller assumes it owns
//! the bundle it is given, one object per bundle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::bundle::TrustBundle;
use super::issuer::RootIssuer;
use super::state::{plan, Observed, RotationAction, Step};
use super::store::RootCertificateStore;
use crate::certificate::RootCertificate;
use crate::config::{ProviderConfig, ProviderSpec};
use crate::domain::{MeshRootCertificate, MeshRootCertificateStatus, RootState, RotationStage};
use crate::errors::{ConflictError, MeshplaneError, Result};
use crate::observability::{log_error, ErrorCode, MetricsRecorder};
use crate::utils::BackoffPolicy;

pub const ISSUED_PROVIDER_ANNOTATION: &str = "meshplane.io/issued-provider";
pub const ISSUED_ROOT_ANNOTATION: &str = "meshplane.io/issued-root";
pub const ISSUED_ROOT_SERIAL_ANNOTATION: &str = "meshplane.io/issued-root-serial";
pub const PREVIOUS_PROVIDER_ANNOTATION: &str = "meshplane.io/previous-provider";
pub const PREVIOUS_ROOT_ANNOTATION: &str = "meshplane.io/previous-root";
pub const PREVIOUS_ROOT_SERIAL_ANNOTATION: &str = "meshplane.io/previous-root-serial";

/// Upper bound on steps taken for one queued object before yielding.
const MAX_STEPS_PER_OBJECT: usize = 16;

/// Annotation keys of one recorded root.
struct RootRecord {
    provider: &'static str,
    root: &'static str,
    serial: &'static str,
}

impl RootRecord {
    fn keys(&self) -> [&'static str; 3] {
        [self.provider, self.root, self.serial]
    }
}

const ISSUED: RootRecord = RootRecord {
    provider: ISSUED_PROVIDER_ANNOTATION,
    root: ISSUED_ROOT_ANNOTATION,
    serial: ISSUED_ROOT_SERIAL_ANNOTATION,
};

const PREVIOUS: RootRecord = RootRecord {
    provider: PREVIOUS_PROVIDER_ANNOTATION,
    root: PREVIOUS_ROOT_ANNOTATION,
    serial: PREVIOUS_ROOT_SERIAL_ANNOTATION,
};

/// Result of one reconcile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object does not exist.
    NotFound,
    /// Nothing to do; no write was issued.
    Unchanged,
    /// The status moved from `from` to `to`.
    Updated { from: MeshRootCertificateStatus, to: MeshRootCertificateStatus },
}

/// Reconciles `MeshRootCertificate` objects against their desired provider.
#[derive(Debug, Clone)]
pub struct RootRotationController {
    store: Arc<dyn RootCertificateStore>,
    issuer: Arc<dyn RootIssuer>,
    bundle: TrustBundle,
    retry: BackoffPolicy,
    metrics: MetricsRecorder,
}

impl RootRotationController {
    pub fn new(
        store: Arc<dyn RootCertificateStore>,
        issuer: Arc<dyn RootIssuer>,
        bundle: TrustBundle,
    ) -> Self {
        Self {
            store,
            issuer,
            bundle,
            retry: BackoffPolicy::conflict_retry(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Override the policy used to retry conflicting writes.
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn trust_bundle(&self) -> &TrustBundle {
        &self.bundle
    }

    /// Names of every stored object, for seeding a reconcile queue.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let list = self.store.list().await?;
        Ok(list.items.iter().map(|object| object.name().to_string()).collect())
    }

    /// Run one reconcile step for `name`.
    ///
    /// # Errors
    ///
    /// - [`MeshplaneError::Config`] if the desired provider is invalid
    /// - [`MeshplaneError::Issuance`] if the new root could not be resolved
    /// - [`MeshplaneError::Conflict`] if every write attempt conflicted
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        let span = crate::reconcile_span!(name);
        self.reconcile_with_retry(name).instrument(span).await
    }

    async fn reconcile_with_retry(&self, name: &str) -> Result<ReconcileOutcome> {
        for attempt in 0..self.retry.max_attempts {
            self.retry.wait(attempt).await;
            match self.reconcile_once(name).await {
                Err(MeshplaneError::Store(e)) if e.is_conflict() => {
                    warn!(attempt = attempt + 1, error = %e, "Root status write conflicted");
                }
                other => return other,
            }
        }

        let err = ConflictError { name: name.to_string(), attempts: self.retry.max_attempts };
        log_error(ErrorCode::RootStatusConflict, &err, "Giving up on root status update");
        Err(err.into())
    }

    /// Reconcile repeatedly until the object settles or `max_steps` is reached.
    /// Returns the last status observed.
    pub async fn reconcile_until_settled(
        &self,
        name: &str,
        max_steps: usize,
    ) -> Result<Option<MeshRootCertificateStatus>> {
        for _ in 0..max_steps {
            match self.reconcile(name).await? {
                ReconcileOutcome::NotFound => return Ok(None),
                ReconcileOutcome::Unchanged => break,
                ReconcileOutcome::Updated { .. } => {}
            }
        }
        Ok(self.store.get(name).await?.map(|object| object.status))
    }

    /// Process object names from `queue` until it closes or `cancel` fires.
    pub async fn run(&self, mut queue: mpsc::Receiver<String>, cancel: CancellationToken) {
        info!("Root rotation controller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = queue.recv() => {
                    let Some(name) = next else { break };
                    let result = self.reconcile_until_settled(&name, MAX_STEPS_PER_OBJECT).await;
                    if let Err(e) = result {
                        warn!(name = %name, error = %e, "Root reconcile failed");
                    }
                }
            }
        }
        info!("Root rotation controller stopped");
    }

    async fn reconcile_once(&self, name: &str) -> Result<ReconcileOutcome> {
        let Some(original) = self.store.get(name).await? else {
            debug!("Root certificate object not found");
            return Ok(ReconcileOutcome::NotFound);
        };

        let desired = original.spec.provider.resolve().inspect_err(|e| {
            log_error(ErrorCode::InvalidProviderConfig, e, "Invalid root certificate provider");
        })?;
        let fingerprint = provider_fingerprint(&desired)?;
        let annotations = &original.metadata.annotations;
        let observed = Observed {
            provider_changed: annotations
                .get(ISSUED_PROVIDER_ANNOTATION)
                .is_some_and(|issued| issued != &fingerprint),
            root_recorded: annotations.contains_key(ISSUED_ROOT_ANNOTATION),
        };

        let (state, stage) = match original.status.phase() {
            Ok(phase) => phase,
            Err(reason) => return self.mark_error(original, reason).await,
        };

        let next = match plan(state, stage, observed) {
            Step::Terminal => {
                self.sync_bundle(&original);
                return Ok(ReconcileOutcome::Unchanged);
            }
            Step::Undefined => {
                let reason = format!("No transition from state '{}' stage '{}'", state, stage);
                return self.mark_error(original, reason).await;
            }
            Step::Transition { action, next } => {
                let mut object = original.clone();
                if let Some(action) = action {
                    let performed =
                        self.perform(action, &mut object, &desired, &fingerprint).await?;
                    if let Err(reason) = performed {
                        return self.mark_error(original, reason).await;
                    }
                }
                object.status = MeshRootCertificateStatus::new(next.0, next.1);
                object
            }
        };

        self.write(original, next).await
    }

    /// Update the recorded roots for a step. The outer error aborts the step;
    /// the inner one means the object is inconsistent and needs an operator.
    async fn perform(
        &self,
        action: RotationAction,
        object: &mut MeshRootCertificate,
        desired: &ProviderConfig,
        fingerprint: &str,
    ) -> Result<std::result::Result<(), String>> {
        if action == RotationAction::IssueRoot {
            let root = self.issuer.resolve_root(desired).await.inspect_err(|e| {
                log_error(ErrorCode::IssuanceFailed, e, "Error resolving new root certificate");
            })?;
            info!(
                provider = %desired.kind(),
                serial = %root.serial_number(),
                "Issued root certificate for rollout"
            );
            let annotations = &mut object.metadata.annotations;
            move_record(annotations, &ISSUED, &PREVIOUS);
            annotations.insert(ISSUED.provider.to_string(), fingerprint.to_string());
            annotations.insert(ISSUED.root.to_string(), root.pem().to_string());
            annotations.insert(ISSUED.serial.to_string(), root.serial_number().to_string());
            return Ok(Ok(()));
        }

        let issued = match recorded_root(object, &ISSUED) {
            Ok(Some(root)) => root,
            Ok(None) => return Ok(Err(format!("Annotation '{}' is missing", ISSUED.root))),
            Err(reason) => return Ok(Err(reason)),
        };

        let annotations = &mut object.metadata.annotations;
        match action {
            RotationAction::RetireOldRoots => {
                clear_record(annotations, &PREVIOUS);
            }
            RotationAction::WithdrawRoot => {
                info!(serial = %issued.serial_number(), "Withdrawing root certificate");
                clear_record(annotations, &ISSUED);
                move_record(annotations, &PREVIOUS, &ISSUED);
            }
            RotationAction::DistributeRoot | RotationAction::IssueRoot => {}
        }
        Ok(Ok(()))
    }

    /// Make the trust bundle hold the roots `object` says peers trust:
    ///
    /// - while the issued root is being rolled out, only the previous root
    /// - during dual trust, the previous and the issued root
    /// - otherwise the issued root
    ///
    /// Objects in `error` leave the bundle alone.
    fn sync_bundle(&self, object: &MeshRootCertificate) {
        let Ok((state, stage)) = object.status.phase() else { return };
        if state == RootState::Error {
            return;
        }

        let (issued, previous) =
            match (recorded_root(object, &ISSUED), recorded_root(object, &PREVIOUS)) {
                (Ok(issued), Ok(previous)) => (issued, previous),
                (Err(reason), _) | (_, Err(reason)) => {
                    warn!(reason = %reason, "Recorded root unreadable; trust bundle unchanged");
                    return;
                }
            };

        let trusted = match (state, stage) {
            (RootState::IssuingRollout, _) => vec![previous],
            (_, RotationStage::DualTrust) => vec![previous, issued],
            _ => vec![issued],
        };
        self.bundle.replace(trusted.into_iter().flatten().collect());
    }

    async fn mark_error(
        &self,
        original: MeshRootCertificate,
        reason: String,
    ) -> Result<ReconcileOutcome> {
        log_error(
            ErrorCode::UndefinedRotationState,
            &MeshplaneError::internal(reason),
            &format!("Root certificate '{}' requires manual intervention", original.name()),
        );

        let mut object = original.clone();
        object.status.state = RootState::Error.as_str().to_string();
        self.write(original, object).await
    }

    async fn write(
        &self,
        original: MeshRootCertificate,
        object: MeshRootCertificate,
    ) -> Result<ReconcileOutcome> {
        if object == original {
            self.sync_bundle(&original);
            return Ok(ReconcileOutcome::Unchanged);
        }

        let from = original.status;
        let committed = self.store.update(object).await?;
        let to = committed.status.clone();
        self.metrics.record_root_transition(&from.state, &to.state);
        self.sync_bundle(&committed);

        info!(
            from_state = %from.state,
            from_stage = %from.rotation_stage,
            to_state = %to.state,
            to_stage = %to.rotation_stage,
            "Root certificate status updated"
        );
        Ok(ReconcileOutcome::Updated { from, to })
    }
}

/// Stable serialization of a provider configuration for change detection.
/// Credentials serialize redacted, so a rotated Vault token alone does not
/// start a new root rotation.
fn provider_fingerprint(config: &ProviderConfig) -> Result<String> {
    serde_json::to_string(&ProviderSpec::from(config.clone()))
        .map_err(|e| MeshplaneError::internal(format!("Failed to serialize provider: {}", e)))
}

/// Replace the `to` record with the `from` record, leaving `from` empty.
fn move_record(annotations: &mut BTreeMap<String, String>, from: &RootRecord, to: &RootRecord) {
    for (source, target) in from.keys().into_iter().zip(to.keys()) {
        annotations.remove(target);
        if let Some(value) = annotations.remove(source) {
            annotations.insert(target.to_string(), value);
        }
    }
}

fn clear_record(annotations: &mut BTreeMap<String, String>, record: &RootRecord) {
    for key in record.keys() {
        annotations.remove(key);
    }
}

fn recorded_root(
    object: &MeshRootCertificate,
    record: &RootRecord,
) -> std::result::Result<Option<RootCertificate>, String> {
    let Some(pem) = object.metadata.annotations.get(record.root) else {
        return Ok(None);
    };
    RootCertificate::from_pem(pem.as_bytes())
        .map(Some)
        .map_err(|e| format!("Annotation '{}' is not a certificate: {}", record.root, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
    use tracing_test::traced_test;

    use crate::config::{TresorProviderSpec, VaultProviderSpec};
    use crate::domain::MeshRootCertificateList;
    use crate::errors::{IssuanceError, StoreError};
    use crate::rotation::InMemoryRootStore;
    use crate::secrets::SecretString;

    /// Mints one self-signed root per distinct provider kind and counts calls.
    #[derive(Debug, Default)]
    struct CountingIssuer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RootIssuer for CountingIssuer {
        async fn resolve_root(
            &self,
            config: &ProviderConfig,
        ) -> std::result::Result<RootCertificate, IssuanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(IssuanceError::unavailable("vault", "connection refused"));
            }
            let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
            params.distinguished_name.push(DnType::CommonName, config.kind().as_str());
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            let key = KeyPair::generate().unwrap();
            let cert = params.self_signed(&key).unwrap();
            Ok(RootCertificate::from_pem(cert.pem().as_bytes()).unwrap())
        }
    }

    fn tresor() -> ProviderSpec {
        ProviderSpec {
            tresor: Some(TresorProviderSpec { secret_name: "mesh-root".to_string() }),
            ..Default::default()
        }
    }

    fn vault() -> ProviderSpec {
        ProviderSpec {
            vault: Some(VaultProviderSpec {
                host: "vault.internal".to_string(),
                role: "mesh".to_string(),
                token: SecretString::new("token"),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn setup(
        provider: ProviderSpec,
        issuer: CountingIssuer,
    ) -> (RootRotationController, InMemoryRootStore, Arc<CountingIssuer>) {
        let store = InMemoryRootStore::new();
        store.create(MeshRootCertificate::new("mesh-root", provider)).await.unwrap();
        let issuer = Arc::new(issuer);
        let controller = RootRotationController::new(
            Arc::new(store.clone()),
            issuer.clone(),
            TrustBundle::new(),
        )
        .with_retry(BackoffPolicy::immediate(5));
        (controller, store, issuer)
    }

    async fn set_status(store: &InMemoryRootStore, state: &str, stage: &str) {
        let mut object = store.get("mesh-root").await.unwrap().unwrap();
        object.status.state = state.to_string();
        object.status.rotation_stage = stage.to_string();
        store.update(object).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_root_reaches_active() {
        let (controller, store, issuer) = setup(tresor(), CountingIssuer::default()).await;

        let status = controller.reconcile_until_settled("mesh-root", 10).await.unwrap().unwrap();

        assert_eq!(status.phase().unwrap(), (RootState::Active, RotationStage::SoleTrust));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.trust_bundle().len(), 1);
        // create + issuing-rollout + rolling-out + completed + active
        assert_eq!(store.writes(), 5);

        let object = store.get("mesh-root").await.unwrap().unwrap();
        let serial = &object.metadata.annotations[ISSUED_ROOT_SERIAL_ANNOTATION];
        assert_eq!(controller.trust_bundle().roots()[0].serial_number().as_str(), serial);
    }

    #[tokio::test]
    async fn test_active_with_unchanged_provider_does_not_write() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile_until_settled("mesh-root", 10).await.unwrap();
        let writes = store.writes();

        assert_eq!(controller.reconcile("mesh-root").await.unwrap(), ReconcileOutcome::Unchanged);
        assert_eq!(controller.reconcile("mesh-root").await.unwrap(), ReconcileOutcome::Unchanged);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_provider_change_rotates_with_dual_trust() {
        let (controller, store, issuer) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile_until_settled("mesh-root", 10).await.unwrap();
        let old_serial = controller.trust_bundle().roots()[0].serial_number().clone();

        let mut object = store.get("mesh-root").await.unwrap().unwrap();
        object.spec.provider = vault();
        store.update(object).await.unwrap();

        // active -> init -> issuing-rollout -> rolling-out
        for _ in 0..3 {
            controller.reconcile("mesh-root").await.unwrap();
        }
        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(
            object.status.phase().unwrap(),
            (RootState::RollingOut, RotationStage::DualTrust)
        );
        assert_eq!(controller.trust_bundle().len(), 2);
        assert!(controller.trust_bundle().contains(&old_serial));

        let status = controller.reconcile_until_settled("mesh-root", 10).await.unwrap().unwrap();
        assert_eq!(status.phase().unwrap(), (RootState::Active, RotationStage::SoleTrust));
        assert_eq!(controller.trust_bundle().len(), 1);
        assert!(!controller.trust_bundle().contains(&old_serial));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    async fn set_provider(store: &InMemoryRootStore, provider: ProviderSpec) {
        let mut object = store.get("mesh-root").await.unwrap().unwrap();
        object.spec.provider = provider;
        store.update(object).await.unwrap();
    }

    async fn annotation(store: &InMemoryRootStore, key: &str) -> Option<String> {
        let object = store.get("mesh-root").await.unwrap().unwrap();
        object.metadata.annotations.get(key).cloned()
    }

    fn trusted_serials(controller: &RootRotationController) -> Vec<String> {
        let roots = controller.trust_bundle().roots();
        roots.iter().map(|root| root.serial_number().to_string()).collect()
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_root() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile_until_settled("mesh-root", 10).await.unwrap();
        let old_serial = annotation(&store, ISSUED_ROOT_SERIAL_ANNOTATION).await.unwrap();
        let old_provider = annotation(&store, ISSUED_PROVIDER_ANNOTATION).await;

        set_provider(&store, vault()).await;
        for _ in 0..3 {
            controller.reconcile("mesh-root").await.unwrap();
        }
        let previous = annotation(&store, PREVIOUS_ROOT_SERIAL_ANNOTATION).await;
        assert_eq!(previous, Some(old_serial.clone()));
        assert_eq!(controller.trust_bundle().len(), 2);

        set_provider(&store, tresor()).await;
        let status = controller.reconcile_until_settled("mesh-root", 10).await.unwrap().unwrap();

        assert_eq!(status.phase().unwrap(), (RootState::Active, RotationStage::SoleTrust));
        assert_eq!(trusted_serials(&controller), vec![old_serial.clone()]);
        assert_eq!(annotation(&store, ISSUED_ROOT_SERIAL_ANNOTATION).await, Some(old_serial));
        assert_eq!(annotation(&store, ISSUED_PROVIDER_ANNOTATION).await, old_provider);
        assert_eq!(annotation(&store, PREVIOUS_ROOT_ANNOTATION).await, None);
    }

    #[tokio::test]
    async fn test_rollback_of_first_rollout_starts_over() {
        let (controller, store, issuer) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile("mesh-root").await.unwrap();
        controller.reconcile("mesh-root").await.unwrap();
        assert_eq!(controller.trust_bundle().len(), 1);

        set_provider(&store, vault()).await;
        let status = controller.reconcile_until_settled("mesh-root", 10).await.unwrap().unwrap();

        assert_eq!(status.phase().unwrap(), (RootState::Active, RotationStage::SoleTrust));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        let serial = annotation(&store, ISSUED_ROOT_SERIAL_ANNOTATION).await.unwrap();
        assert_eq!(trusted_serials(&controller), vec![serial]);
    }

    #[tokio::test]
    async fn test_restarted_controller_rebuilds_bundle_mid_rotation() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile_until_settled("mesh-root", 10).await.unwrap();
        set_provider(&store, vault()).await;
        for _ in 0..3 {
            controller.reconcile("mesh-root").await.unwrap();
        }
        let expected = trusted_serials(&controller);
        assert_eq!(expected.len(), 2);

        let restarted = RootRotationController::new(
            Arc::new(store.clone()),
            Arc::new(CountingIssuer::default()),
            TrustBundle::new(),
        );
        // Reverting moves to rolling-back with both roots still trusted.
        set_provider(&store, tresor()).await;
        restarted.reconcile("mesh-root").await.unwrap();

        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(
            object.status.phase().unwrap(),
            (RootState::RollingBack, RotationStage::DualTrust)
        );
        let mut rebuilt = trusted_serials(&restarted);
        rebuilt.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(rebuilt, expected);
    }

    /// Changes the desired provider just before the next update lands, so
    /// that update conflicts.
    #[derive(Debug)]
    struct RacingStore {
        inner: InMemoryRootStore,
        change_to: std::sync::Mutex<Option<ProviderSpec>>,
    }

    #[async_trait]
    impl RootCertificateStore for RacingStore {
        async fn get(
            &self,
            name: &str,
        ) -> std::result::Result<Option<MeshRootCertificate>, StoreError> {
            self.inner.get(name).await
        }

        async fn list(&self) -> std::result::Result<MeshRootCertificateList, StoreError> {
            self.inner.list().await
        }

        async fn create(
            &self,
            object: MeshRootCertificate,
        ) -> std::result::Result<MeshRootCertificate, StoreError> {
            self.inner.create(object).await
        }

        async fn update(
            &self,
            object: MeshRootCertificate,
        ) -> std::result::Result<MeshRootCertificate, StoreError> {
            let change = self.change_to.lock().unwrap().take();
            if let Some(provider) = change {
                let mut current = self.inner.get(object.name()).await?.unwrap();
                current.spec.provider = provider;
                self.inner.update(current).await?;
            }
            self.inner.update(object).await
        }
    }

    #[tokio::test]
    async fn test_conflicting_retire_keeps_both_roots_trusted() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        controller.reconcile_until_settled("mesh-root", 10).await.unwrap();
        set_provider(&store, vault()).await;
        for _ in 0..3 {
            controller.reconcile("mesh-root").await.unwrap();
        }
        let old_serial = annotation(&store, PREVIOUS_ROOT_SERIAL_ANNOTATION).await.unwrap();

        let racing = Arc::new(RacingStore {
            inner: store.clone(),
            change_to: std::sync::Mutex::new(Some(tresor())),
        });
        let controller = RootRotationController::new(
            racing,
            Arc::new(CountingIssuer::default()),
            controller.trust_bundle().clone(),
        )
        .with_retry(BackoffPolicy::immediate(5));

        // The retire step conflicts; the retry sees the reverted provider.
        let outcome = controller.reconcile("mesh-root").await.unwrap();
        let ReconcileOutcome::Updated { to, .. } = outcome else {
            panic!("expected an update, got {:?}", outcome);
        };
        assert_eq!(to.phase().unwrap(), (RootState::RollingBack, RotationStage::DualTrust));
        assert_eq!(controller.trust_bundle().len(), 2);

        let status = controller.reconcile_until_settled("mesh-root", 10).await.unwrap().unwrap();
        assert_eq!(status.phase().unwrap(), (RootState::Active, RotationStage::SoleTrust));
        assert_eq!(trusted_serials(&controller), vec![old_serial]);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_undefined_pair_moves_to_error_once() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        set_status(&store, "completed", "pending").await;

        let outcome = controller.reconcile("mesh-root").await.unwrap();
        let ReconcileOutcome::Updated { to, .. } = outcome else {
            panic!("expected an update, got {:?}", outcome);
        };
        assert_eq!(to.state, "error");
        assert_eq!(to.rotation_stage, "pending");
        assert!(logs_contain("E1007"));

        let writes = store.writes();
        assert_eq!(controller.reconcile("mesh-root").await.unwrap(), ReconcileOutcome::Unchanged);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_unknown_status_string_moves_to_error() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        set_status(&store, "paused", "").await;

        controller.reconcile("mesh-root").await.unwrap();
        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(object.status.state, "error");
    }

    #[tokio::test]
    async fn test_missing_issued_root_moves_to_error() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        set_status(&store, "issuing-rollout", "pending").await;

        controller.reconcile("mesh-root").await.unwrap();
        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(object.status.state, "error");
        assert!(controller.trust_bundle().is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_with_fresh_state() {
        let (controller, store, issuer) = setup(tresor(), CountingIssuer::default()).await;
        store.conflict_next(2);

        let outcome = controller.reconcile("mesh-root").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(
            object.status.phase().unwrap(),
            (RootState::IssuingRollout, RotationStage::Pending)
        );
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_conflict_budget_exhausted() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        store.conflict_next(5);

        let err = controller.reconcile("mesh-root").await.unwrap_err();
        assert!(matches!(err, MeshplaneError::Conflict(ConflictError { attempts: 5, .. })));
        assert!(logs_contain("E1005"));
    }

    #[tokio::test]
    async fn test_issuer_failure_leaves_status_untouched() {
        let issuer = CountingIssuer { fail: true, ..Default::default() };
        let (controller, store, _) = setup(tresor(), issuer).await;

        let err = controller.reconcile("mesh-root").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_invalid_provider_is_config_error() {
        let (controller, store, _) =
            setup(ProviderSpec::default(), CountingIssuer::default()).await;

        let err = controller.reconcile("mesh-root").await.unwrap_err();
        assert!(matches!(err, MeshplaneError::Config(_)));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (controller, _, _) = setup(tresor(), CountingIssuer::default()).await;
        assert_eq!(controller.reconcile("other").await.unwrap(), ReconcileOutcome::NotFound);
        assert_eq!(controller.reconcile_until_settled("other", 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_processes_queue_until_cancelled() {
        let (controller, store, _) = setup(tresor(), CountingIssuer::default()).await;
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let controller = controller.clone();
            let cancel = cancel.clone();
            async move { controller.run(rx, cancel).await }
        });

        tx.send("mesh-root".to_string()).await.unwrap();
        for _ in 0..100 {
            let object = store.get("mesh-root").await.unwrap().unwrap();
            if object.status.state == "active" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        cancel.cancel();
        handle.await.unwrap();
        let object = store.get("mesh-root").await.unwrap().unwrap();
        assert_eq!(object.status.state, "active");
    }
}
