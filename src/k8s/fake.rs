//! In-memory cluster for driving the cache controller in tests.
//!
//! Objects get a resource version on every write. Each call to a `watch_*`
//! method replays the current objects as a listing and then streams live
//! changes, like a real API server watch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::types::{Namespace, ResourceKind, Service};
use super::watch::{WatchEvent, WatchSource};
use crate::errors::StoreError;

#[derive(Debug, Default)]
struct FakeState {
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<(String, String), Service>,
    version: u64,
    namespace_watchers: Vec<mpsc::UnboundedSender<WatchEvent<Namespace>>>,
    service_watchers: Vec<mpsc::UnboundedSender<WatchEvent<Service>>>,
    held_namespaces: bool,
    held_services: bool,
}

impl FakeState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn emit_namespace(&mut self, event: WatchEvent<Namespace>) {
        self.namespace_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_service(&mut self, event: WatchEvent<Service>) {
        self.service_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Cloneable in-memory cluster; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeClusterApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never complete the initial listing of `kind` for watches started
    /// after this call.
    pub fn hold_listing(&self, kind: ResourceKind) {
        let mut state = self.state();
        match kind {
            ResourceKind::Namespaces => state.held_namespaces = true,
            ResourceKind::Services => state.held_services = true,
        }
    }

    pub fn create_namespace(&self, mut ns: Namespace) -> Result<Namespace, StoreError> {
        let mut state = self.state();
        if let Some(existing) = state.namespaces.get(ns.name()) {
            return Err(conflict(ns.name(), &existing.metadata.resource_version));
        }
        ns.metadata.resource_version = state.next_version();
        state.namespaces.insert(ns.name().to_string(), ns.clone());
        state.emit_namespace(WatchEvent::Apply(ns.clone()));
        Ok(ns)
    }

    /// Replace a namespace, ignoring the supplied resource version.
    pub fn update_namespace(&self, mut ns: Namespace) -> Result<Namespace, StoreError> {
        let mut state = self.state();
        if !state.namespaces.contains_key(ns.name()) {
            return Err(StoreError::not_found(ns.name()));
        }
        ns.metadata.resource_version = state.next_version();
        state.namespaces.insert(ns.name().to_string(), ns.clone());
        state.emit_namespace(WatchEvent::Apply(ns.clone()));
        Ok(ns)
    }

    /// Delete a namespace and every service in it.
    pub fn delete_namespace(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let ns = state.namespaces.remove(name).ok_or_else(|| StoreError::not_found(name))?;
        state.emit_namespace(WatchEvent::Delete(ns));

        let keys: Vec<_> = state.services.keys().filter(|(ns, _)| ns == name).cloned().collect();
        for key in keys {
            if let Some(svc) = state.services.remove(&key) {
                state.emit_service(WatchEvent::Delete(svc));
            }
        }
        Ok(())
    }

    pub fn create_service(&self, mut svc: Service) -> Result<Service, StoreError> {
        let mut state = self.state();
        let key = (svc.namespace().to_string(), svc.name().to_string());
        if let Some(existing) = state.services.get(&key) {
            let name = svc.mesh_service().to_string();
            return Err(conflict(&name, &existing.metadata.resource_version));
        }
        svc.metadata.resource_version = state.next_version();
        state.services.insert(key, svc.clone());
        state.emit_service(WatchEvent::Apply(svc.clone()));
        Ok(svc)
    }

    /// Replace a service, ignoring the supplied resource version.
    pub fn update_service(&self, mut svc: Service) -> Result<Service, StoreError> {
        let mut state = self.state();
        let key = (svc.namespace().to_string(), svc.name().to_string());
        if !state.services.contains_key(&key) {
            return Err(StoreError::not_found(svc.mesh_service().to_string()));
        }
        svc.metadata.resource_version = state.next_version();
        state.services.insert(key, svc.clone());
        state.emit_service(WatchEvent::Apply(svc.clone()));
        Ok(svc)
    }

    pub fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let svc = state
            .services
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", namespace, name)))?;
        state.emit_service(WatchEvent::Delete(svc));
        Ok(())
    }
}

fn conflict(name: &str, actual: &str) -> StoreError {
    StoreError::Conflict { name: name.to_string(), expected: String::new(), actual: actual.into() }
}

/// Listing events for `objects`, optionally without the closing `InitDone`.
fn listing<T: Clone>(objects: impl Iterator<Item = T>, held: bool) -> Vec<WatchEvent<T>> {
    let mut events = vec![WatchEvent::Init];
    events.extend(objects.map(WatchEvent::InitApply));
    if !held {
        events.push(WatchEvent::InitDone);
    }
    events
}

impl WatchSource for FakeClusterApi {
    fn watch_namespaces(&self) -> BoxStream<'static, WatchEvent<Namespace>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        for event in listing(state.namespaces.values().cloned(), state.held_namespaces) {
            let _ = tx.send(event);
        }
        state.namespace_watchers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    fn watch_services(&self) -> BoxStream<'static, WatchEvent<Service>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        for event in listing(state.services.values().cloned(), state.held_services) {
            let _ = tx.send(event);
        }
        state.service_watchers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}
