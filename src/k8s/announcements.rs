//! Per-kind announcement fan-out.
//!
//! Each subscriber gets its own bounded queue. Publishing waits for room in
//! every live subscriber's queue, so a consumer that stops draining slows the
//! publisher of its own kind and no other. Dropped receivers are pruned on the
//! next publish.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{Namespace, ResourceKind, Service};
use crate::observability::MetricsRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementType {
    Added,
    Updated,
    Deleted,
}

/// The object an announcement is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Namespace(Namespace),
    Service(Service),
}

impl From<Namespace> for Resource {
    fn from(ns: Namespace) -> Self {
        Self::Namespace(ns)
    }
}

impl From<Service> for Resource {
    fn from(svc: Service) -> Self {
        Self::Service(svc)
    }
}

/// A change to a cached object, published after the cache reflects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub kind: ResourceKind,
    pub event: AnnouncementType,
    pub old_object: Option<Resource>,
    pub new_object: Option<Resource>,
}

impl Announcement {
    pub fn added(kind: ResourceKind, object: impl Into<Resource>) -> Self {
        Self {
            kind,
            event: AnnouncementType::Added,
            old_object: None,
            new_object: Some(object.into()),
        }
    }

    pub fn updated(kind: ResourceKind, old: impl Into<Resource>, new: impl Into<Resource>) -> Self {
        Self {
            kind,
            event: AnnouncementType::Updated,
            old_object: Some(old.into()),
            new_object: Some(new.into()),
        }
    }

    pub fn deleted(kind: ResourceKind, object: impl Into<Resource>) -> Self {
        Self {
            kind,
            event: AnnouncementType::Deleted,
            old_object: Some(object.into()),
            new_object: None,
        }
    }

    /// The most recent state of the object.
    pub fn object(&self) -> Option<&Resource> {
        self.new_object.as_ref().or(self.old_object.as_ref())
    }
}

/// Fan-out for one resource kind.
#[derive(Debug)]
pub struct AnnouncementBus {
    kind: ResourceKind,
    buffer: usize,
    subscribers: Mutex<Vec<mpsc::Sender<Announcement>>>,
    metrics: MetricsRecorder,
}

impl AnnouncementBus {
    pub fn new(kind: ResourceKind, buffer: usize) -> Self {
        Self {
            kind,
            buffer: buffer.max(1),
            subscribers: Mutex::new(Vec::new()),
            metrics: MetricsRecorder::new(),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::Sender<Announcement>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Receive every announcement published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<Announcement> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Deliver `announcement` to every subscriber, waiting for queue space.
    ///
    /// Returns the number of subscribers reached. Delivery stops as soon as
    /// `cancel` fires; nothing is delivered after cancellation.
    pub async fn publish(&self, announcement: Announcement, cancel: &CancellationToken) -> usize {
        let targets: Vec<_> = self.subscribers().clone();
        let mut delivered = 0;

        for tx in targets {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(announcement.clone()) => {
                    if sent.is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        self.subscribers().retain(|tx| !tx.is_closed());
        if delivered > 0 {
            self.metrics.record_announcement(self.kind.as_str());
        }
        delivered
    }
}

/// One [`AnnouncementBus`] per [`ResourceKind`].
#[derive(Debug)]
pub struct Announcements {
    namespaces: AnnouncementBus,
    services: AnnouncementBus,
}

impl Announcements {
    pub fn new(buffer: usize) -> Self {
        Self {
            namespaces: AnnouncementBus::new(ResourceKind::Namespaces, buffer),
            services: AnnouncementBus::new(ResourceKind::Services, buffer),
        }
    }

    pub fn bus(&self, kind: ResourceKind) -> &AnnouncementBus {
        match kind {
            ResourceKind::Namespaces => &self.namespaces,
            ResourceKind::Services => &self.services,
        }
    }

    pub fn subscribe(&self, kind: ResourceKind) -> mpsc::Receiver<Announcement> {
        self.bus(kind).subscribe()
    }
}
