//! # Resource Cache Controller
//!
//! Mirrors namespaces and services from a [`WatchSource`] and republishes
//! changes on per-kind announcement buses.
//!
//! Every service is cached, but only services in namespaces labelled with
//! this mesh's name are visible through the accessors and announced. When a
//! namespace joins or leaves the mesh its cached services are announced as
//! added or deleted, after the cache already reflects the new membership.
//! A delete always evicts the entry before it is announced.
//!
//! Each kind is processed by its own task, and only that task publishes on
//! the kind's bus. The namespace task hands membership changes to the service
//! task over an unbounded queue, so a stalled services consumer never holds
//! up namespace announcements. The service task tracks which namespaces it
//! has announced as members and announces a service only while its namespace
//! is in that set. Accessors copy out of the cache under a shared lock and
//! keep answering after [`CacheController::shutdown`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::announcements::{Announcement, Announcements};
use super::types::{MeshService, Namespace, ResourceKind, Service};
use super::watch::{WatchEvent, WatchSource};
use crate::config::CacheSettings;
use crate::errors::SyncTimeoutError;
use crate::observability::{log_error, ErrorCode};

type ServiceKey = (String, String);

#[derive(Debug, Default)]
struct ClusterCache {
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<ServiceKey, Service>,
}

impl ClusterCache {
    fn is_monitored(&self, namespace: &str, mesh_name: &str) -> bool {
        self.namespaces.get(namespace).is_some_and(|ns| ns.is_monitored_by(mesh_name))
    }

    fn services_in(&self, namespace: &str) -> impl Iterator<Item = &Service> + '_ {
        let namespace = namespace.to_string();
        self.services.values().filter(move |svc| svc.namespace() == namespace)
    }
}

/// Membership change handed from the namespace task to the service task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Membership {
    Joined(String),
    Left(String),
}

#[derive(Debug)]
struct ControllerInner {
    mesh_name: String,
    cache: RwLock<ClusterCache>,
    announcements: Announcements,
    namespaces_synced: watch::Sender<bool>,
    services_synced: watch::Sender<bool>,
    membership: mpsc::UnboundedSender<Membership>,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Cache of monitored namespaces and their services.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Debug, Clone)]
pub struct CacheController {
    inner: Arc<ControllerInner>,
}

impl CacheController {
    /// Start watching `source` for the mesh named `mesh_name`.
    ///
    /// Must be called from within a Tokio runtime. Processing stops when
    /// `cancel` fires or [`CacheController::shutdown`] is called.
    pub fn start(
        mesh_name: impl Into<String>,
        source: Arc<dyn WatchSource>,
        settings: &CacheSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (membership, membership_rx) = mpsc::unbounded_channel();
        let controller = Self {
            inner: Arc::new(ControllerInner {
                mesh_name: mesh_name.into(),
                cache: RwLock::new(ClusterCache::default()),
                announcements: Announcements::new(settings.announcement_buffer),
                namespaces_synced: watch::channel(false).0,
                services_synced: watch::channel(false).0,
                membership,
                cancel,
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };

        let namespaces = tokio::spawn({
            let controller = controller.clone();
            let stream = source.watch_namespaces();
            async move { controller.process_namespaces(stream).await }
        });
        let services = tokio::spawn({
            let controller = controller.clone();
            let stream = source.watch_services();
            async move { controller.process_services(stream, membership_rx).await }
        });
        controller.tasks().extend([namespaces, services]);

        info!(mesh_name = %controller.inner.mesh_name, "Resource cache controller started");
        controller
    }

    fn read(&self) -> RwLockReadGuard<'_, ClusterCache> {
        self.inner.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClusterCache> {
        self.inner.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mesh_name(&self) -> &str {
        &self.inner.mesh_name
    }

    /// Whether `name` is cached and labelled for this mesh.
    pub fn is_monitored_namespace(&self, name: &str) -> bool {
        self.read().is_monitored(name, &self.inner.mesh_name)
    }

    /// Any cached namespace, monitored or not.
    pub fn get_namespace(&self, name: &str) -> Option<Namespace> {
        self.read().namespaces.get(name).cloned()
    }

    /// Names of monitored namespaces, sorted.
    ///
    /// Only authoritative once [`CacheController::is_synced`] is true.
    pub fn list_monitored_namespaces(&self) -> Vec<String> {
        let mesh_name = &self.inner.mesh_name;
        self.read()
            .namespaces
            .values()
            .filter(|ns| ns.is_monitored_by(mesh_name))
            .map(|ns| ns.name().to_string())
            .collect()
    }

    /// The service, if its namespace is monitored.
    pub fn get_service(&self, mesh_service: &MeshService) -> Option<Service> {
        let cache = self.read();
        if !cache.is_monitored(&mesh_service.namespace, &self.inner.mesh_name) {
            return None;
        }
        let key = (mesh_service.namespace.clone(), mesh_service.name.clone());
        cache.services.get(&key).cloned()
    }

    /// Every service in a monitored namespace, ordered by namespace and name.
    ///
    /// Only authoritative once [`CacheController::is_synced`] is true.
    pub fn list_services(&self) -> Vec<Service> {
        let cache = self.read();
        cache
            .services
            .values()
            .filter(|svc| cache.is_monitored(svc.namespace(), &self.inner.mesh_name))
            .cloned()
            .collect()
    }

    /// Services of one namespace; empty if the namespace is not monitored.
    pub fn list_services_in_namespace(&self, namespace: &str) -> Vec<Service> {
        let cache = self.read();
        if !cache.is_monitored(namespace, &self.inner.mesh_name) {
            return Vec::new();
        }
        cache.services_in(namespace).cloned().collect()
    }

    /// Subscribe to add/update/delete announcements for `kind`.
    ///
    /// The receiver has a bounded queue. Not draining it stalls publication
    /// for this kind only.
    pub fn get_announcements_channel(&self, kind: ResourceKind) -> mpsc::Receiver<Announcement> {
        self.inner.announcements.subscribe(kind)
    }

    /// Whether the initial listing of every kind has been applied.
    pub fn is_synced(&self) -> bool {
        *self.inner.namespaces_synced.borrow() && *self.inner.services_synced.borrow()
    }

    /// Wait until the initial listing of every kind has been applied.
    pub async fn wait_for_cache_sync(&self, timeout: Duration) -> Result<(), SyncTimeoutError> {
        let mut namespaces = self.inner.namespaces_synced.subscribe();
        let mut services = self.inner.services_synced.subscribe();

        let waited = tokio::time::timeout(timeout, async {
            // The senders live as long as the controller, so these only
            // return once the flag is set.
            let _ = namespaces.wait_for(|synced| *synced).await;
            let _ = services.wait_for(|synced| *synced).await;
        })
        .await;

        if waited.is_ok() && self.is_synced() {
            debug!("Resource cache synced");
            return Ok(());
        }

        let mut pending = Vec::new();
        if !*self.inner.namespaces_synced.borrow() {
            pending.push(ResourceKind::Namespaces.as_str());
        }
        if !*self.inner.services_synced.borrow() {
            pending.push(ResourceKind::Services.as_str());
        }
        let err = SyncTimeoutError { kinds: pending.join(", "), timeout };
        log_error(ErrorCode::CacheSyncTimeout, &err, "Resource cache failed to sync");
        Err(err)
    }

    /// Stop processing. In-flight events finish; no announcement is published
    /// afterwards. The cache keeps its last contents.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = self.tasks().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(mesh_name = %self.inner.mesh_name, "Resource cache controller stopped");
    }

    async fn publish(&self, announcement: Announcement) {
        let bus = self.inner.announcements.bus(announcement.kind);
        bus.publish(announcement, &self.inner.cancel).await;
    }

    // ------------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------------

    async fn process_namespaces(
        &self,
        mut stream: futures::stream::BoxStream<'static, WatchEvent<Namespace>>,
    ) {
        // Names seen during the current listing, if one is in progress.
        let mut listing: Option<BTreeSet<String>> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                WatchEvent::Init => listing = Some(BTreeSet::new()),
                WatchEvent::InitApply(ns) => {
                    if let Some(seen) = listing.as_mut() {
                        seen.insert(ns.name().to_string());
                    }
                    self.apply_namespace(ns).await;
                }
                WatchEvent::InitDone => {
                    let seen = listing.take().unwrap_or_default();
                    let stale: Vec<Namespace> = self
                        .read()
                        .namespaces
                        .values()
                        .filter(|ns| !seen.contains(ns.name()))
                        .cloned()
                        .collect();
                    for ns in stale {
                        self.delete_namespace(ns).await;
                    }
                    self.inner.namespaces_synced.send_replace(true);
                    debug!("Namespace listing applied");
                }
                WatchEvent::Apply(ns) => self.apply_namespace(ns).await,
                WatchEvent::Delete(ns) => self.delete_namespace(ns).await,
            }
        }
        debug!("Namespace processing stopped");
    }

    async fn apply_namespace(&self, ns: Namespace) {
        let mesh_name = &self.inner.mesh_name;
        let now_monitored = ns.is_monitored_by(mesh_name);

        let (previous, was_monitored) = {
            let mut cache = self.write();
            let was_monitored = cache.is_monitored(ns.name(), mesh_name);
            let previous = cache.namespaces.insert(ns.name().to_string(), ns.clone());
            if was_monitored != now_monitored {
                let name = ns.name().to_string();
                self.hand_off(if now_monitored {
                    Membership::Joined(name)
                } else {
                    Membership::Left(name)
                });
            }
            (previous, was_monitored)
        };

        if was_monitored != now_monitored {
            info!(
                namespace = %ns.name(),
                monitored = now_monitored,
                "Namespace mesh membership changed"
            );
        }

        let announcement = match (previous, was_monitored, now_monitored) {
            (Some(old), true, true) if old != ns => {
                Some(Announcement::updated(ResourceKind::Namespaces, old, ns))
            }
            (_, false, true) => Some(Announcement::added(ResourceKind::Namespaces, ns)),
            (Some(old), true, false) => Some(Announcement::deleted(ResourceKind::Namespaces, old)),
            _ => None,
        };
        if let Some(announcement) = announcement {
            self.publish(announcement).await;
        }
    }

    async fn delete_namespace(&self, ns: Namespace) {
        let (removed, was_monitored) = {
            let mut cache = self.write();
            let was_monitored = cache.is_monitored(ns.name(), &self.inner.mesh_name);
            let removed = cache.namespaces.remove(ns.name());
            if was_monitored {
                self.hand_off(Membership::Left(ns.name().to_string()));
            }
            (removed, was_monitored)
        };

        let Some(removed) = removed else { return };
        debug!(namespace = %removed.name(), "Namespace removed from cache");

        if was_monitored {
            self.publish(Announcement::deleted(ResourceKind::Namespaces, removed)).await;
        }
    }

    /// Sent under the cache write lock, so changes queue in the order they
    /// were applied.
    fn hand_off(&self, change: Membership) {
        // The receiver only goes away with the service task, after shutdown.
        let _ = self.inner.membership.send(change);
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    async fn process_services(
        &self,
        mut stream: futures::stream::BoxStream<'static, WatchEvent<Service>>,
        mut membership: mpsc::UnboundedReceiver<Membership>,
    ) {
        let mut listing: Option<BTreeSet<ServiceKey>> = None;
        // Namespaces whose services this task currently announces.
        let mut members: BTreeSet<String> = BTreeSet::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                Some(change) = membership.recv() => {
                    self.apply_membership(change, &mut members).await;
                    continue;
                }
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                WatchEvent::Init => listing = Some(BTreeSet::new()),
                WatchEvent::InitApply(svc) => {
                    if let Some(seen) = listing.as_mut() {
                        seen.insert(service_key(&svc));
                    }
                    self.apply_service(svc, &members).await;
                }
                WatchEvent::InitDone => {
                    let seen = listing.take().unwrap_or_default();
                    let stale: Vec<Service> = self
                        .read()
                        .services
                        .iter()
                        .filter(|(key, _)| !seen.contains(*key))
                        .map(|(_, svc)| svc.clone())
                        .collect();
                    for svc in stale {
                        self.delete_service(svc, &members).await;
                    }
                    self.inner.services_synced.send_replace(true);
                    debug!("Service listing applied");
                }
                WatchEvent::Apply(svc) => self.apply_service(svc, &members).await,
                WatchEvent::Delete(svc) => self.delete_service(svc, &members).await,
            }
        }
        debug!("Service processing stopped");
    }

    async fn apply_membership(&self, change: Membership, members: &mut BTreeSet<String>) {
        let (namespace, joined) = match change {
            Membership::Joined(name) => (name, true),
            Membership::Left(name) => (name, false),
        };
        let changed =
            if joined { members.insert(namespace.clone()) } else { members.remove(&namespace) };
        if !changed {
            return;
        }

        let derived: Vec<Announcement> = self
            .read()
            .services_in(&namespace)
            .map(|svc| {
                if joined {
                    Announcement::added(ResourceKind::Services, svc.clone())
                } else {
                    Announcement::deleted(ResourceKind::Services, svc.clone())
                }
            })
            .collect();
        debug!(namespace = %namespace, joined, services = derived.len(), "Services re-announced");

        for announcement in derived {
            self.publish(announcement).await;
        }
    }

    async fn apply_service(&self, svc: Service, members: &BTreeSet<String>) {
        let announced = members.contains(svc.namespace());
        let announcement = {
            let mut cache = self.write();
            let previous = cache.services.insert(service_key(&svc), svc.clone());
            if !announced {
                None
            } else {
                match previous {
                    Some(old) if old == svc => None,
                    Some(old) => Some(Announcement::updated(ResourceKind::Services, old, svc)),
                    None => Some(Announcement::added(ResourceKind::Services, svc)),
                }
            }
        };

        if let Some(announcement) = announcement {
            self.publish(announcement).await;
        }
    }

    async fn delete_service(&self, svc: Service, members: &BTreeSet<String>) {
        let announced = members.contains(svc.namespace());
        let removed = self.write().services.remove(&service_key(&svc));
        let announcement = removed
            .filter(|_| announced)
            .map(|old| Announcement::deleted(ResourceKind::Services, old));

        if let Some(announcement) = announcement {
            self.publish(announcement).await;
        }
    }
}

fn service_key(svc: &Service) -> ServiceKey {
    (svc.namespace().to_string(), svc.name().to_string())
}
