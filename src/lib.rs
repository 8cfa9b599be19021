//! # Meshplane
//!
//! The trust and cluster-state core of a service-mesh control plane: a
//! certificate authority that issues, tracks and rotates short-lived workload
//! certificates, and a cache of the namespaces and services that belong to the
//! mesh.
//!
//! ## Architecture
//!
//! ```text
//! cluster watch ─→ Resource Cache Controller ─→ announcement buses ─→ consumers
//!
//! renewal loop ─→ Certificate Manager ─→ Provider (tresor | cert-manager | vault)
//!
//! MeshRootCertificate ─→ Root Rotation Controller ─→ trust bundle
//! ```
//!
//! ## Core Components
//!
//! - **Certificates** ([`certificate`]): PEM codec, certificate entity, the
//!   provider sum type, and the caching manager with its renewal loop
//! - **Root rotation** ([`rotation`]): the root-of-trust state machine
//! - **Resource cache** ([`k8s`]): monitored namespaces and services
//! - **Configuration** ([`config`]): layered file and environment settings
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use meshplane::config::MeshConfig;
//! use meshplane::k8s::FakeClusterApi;
//! use meshplane::rotation::InMemoryRootStore;
//! use meshplane::secrets::InMemorySecretStore;
//! use meshplane::{ClusterHandles, ControlPlane, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (config, _) = MeshConfig::load_validated(None)?;
//!     let cluster = ClusterHandles::new(
//!         Arc::new(InMemorySecretStore::new()),
//!         Arc::new(InMemoryRootStore::new()),
//!         Arc::new(FakeClusterApi::new()),
//!     );
//!     let plane = ControlPlane::start(config, cluster, CancellationToken::new()).await?;
//!     plane.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod certificate;
pub mod config;
pub mod domain;
pub mod errors;
pub mod k8s;
pub mod observability;
pub mod rotation;
pub mod secrets;
pub mod utils;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::certificate::providers::CertificateRequestClient;
use crate::certificate::{CertificateManager, Provider, ProviderContext};
use crate::config::MeshConfig;
use crate::k8s::{CacheController, WatchSource};
use crate::observability::{log_error, ErrorCode};
use crate::rotation::{
    ProviderRootIssuer, RootCertificateStore, RootRotationController, TrustBundle,
};
use crate::secrets::SecretStore;

// Re-export commonly used types and traits
pub use errors::{MeshplaneError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Root objects waiting for the rotation controller.
const ROTATION_QUEUE_CAPACITY: usize = 64;

/// Cluster-facing collaborators the control plane runs against.
#[derive(Debug, Clone)]
pub struct ClusterHandles {
    pub secrets: Arc<dyn SecretStore>,
    pub roots: Arc<dyn RootCertificateStore>,
    pub watch: Arc<dyn WatchSource>,
    /// Required when the cert-manager provider is configured
    pub certificate_requests: Option<Arc<dyn CertificateRequestClient>>,
}

impl ClusterHandles {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        roots: Arc<dyn RootCertificateStore>,
        watch: Arc<dyn WatchSource>,
    ) -> Self {
        Self { secrets, roots, watch, certificate_requests: None }
    }

    pub fn with_certificate_requests(mut self, client: Arc<dyn CertificateRequestClient>) -> Self {
        self.certificate_requests = Some(client);
        self
    }
}

/// The running trust and cluster-state core.
#[derive(Debug)]
pub struct ControlPlane {
    config: MeshConfig,
    certificates: CertificateManager,
    rotation: RootRotationController,
    cache: CacheController,
    renewal: JoinHandle<()>,
    rotation_queue: mpsc::Sender<String>,
    rotation_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ControlPlane {
    /// Build the configured provider, start the resource cache, wait for its
    /// initial sync, then start the renewal loop and the root rotation
    /// controller. Every stored root object is queued for reconciliation.
    ///
    /// # Errors
    ///
    /// - [`MeshplaneError::Config`] if the configuration is invalid
    /// - [`MeshplaneError::Issuance`] if the provider cannot be initialized
    /// - [`MeshplaneError::SyncTimeout`] if the cache does not sync in time
    /// - [`MeshplaneError::Store`] if the root objects cannot be listed
    pub async fn start(
        config: MeshConfig,
        cluster: ClusterHandles,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let provider_config = config.validate().inspect_err(|e| {
            log_error(ErrorCode::InvalidProviderConfig, e, "Invalid mesh configuration");
        })?;

        tracing::info!(
            app_name = APP_NAME,
            version = VERSION,
            mesh_name = %config.mesh_name,
            provider = %provider_config.kind(),
            "Starting meshplane"
        );

        let mut ctx = ProviderContext::new(config.namespace.clone(), cluster.secrets);
        if let Some(client) = cluster.certificate_requests {
            ctx = ctx.with_certificate_requests(client);
        }

        let provider = Provider::from_config(&provider_config, &ctx).await?;
        let certificates = CertificateManager::new(Arc::new(provider));
        let rotation = RootRotationController::new(
            cluster.roots,
            Arc::new(ProviderRootIssuer::new(ctx)),
            TrustBundle::new(),
        );

        let cache = CacheController::start(
            config.mesh_name.clone(),
            cluster.watch,
            &config.cache,
            cancel.child_token(),
        );
        if let Err(e) = cache.wait_for_cache_sync(config.cache.sync_timeout()).await {
            cache.shutdown().await;
            return Err(e.into());
        }
        let roots = match rotation.list_names().await {
            Ok(roots) => roots,
            Err(e) => {
                cache.shutdown().await;
                return Err(e);
            }
        };

        let renewal =
            certificates.start(config.certificates.renewal_interval(), cancel.child_token());

        let (rotation_queue, queue) = mpsc::channel(ROTATION_QUEUE_CAPACITY);
        let rotation_task = tokio::spawn({
            let rotation = rotation.clone();
            let cancel = cancel.child_token();
            async move { rotation.run(queue, cancel).await }
        });
        for name in roots {
            // The receiver lives until cancellation, which has not happened yet.
            let _ = rotation_queue.send(name).await;
        }

        tracing::info!("Meshplane started");
        Ok(Self {
            config,
            certificates,
            rotation,
            cache,
            renewal,
            rotation_queue,
            rotation_task,
            cancel,
        })
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn certificates(&self) -> &CertificateManager {
        &self.certificates
    }

    pub fn rotation(&self) -> &RootRotationController {
        &self.rotation
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }

    /// Queue the root object `name` for reconciliation, for instance after
    /// its desired provider changed.
    ///
    /// # Errors
    ///
    /// [`MeshplaneError::Internal`] if the rotation controller has stopped.
    pub async fn reconcile_root(&self, name: impl Into<String>) -> Result<()> {
        self.rotation_queue
            .send(name.into())
            .await
            .map_err(|_| MeshplaneError::internal("Root rotation controller is stopped"))
    }

    /// Stop the renewal loop, the rotation controller and the cache controller.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.cache.shutdown().await;
        let _ = self.renewal.await;
        let _ = self.rotation_task.await;
        tracing::info!("Meshplane stopped");
    }
}
