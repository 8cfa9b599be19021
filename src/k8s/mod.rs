//! # Cluster Resource Cache
//!
//! Watches namespaces and services, keeps the ones that belong to this mesh,
//! and announces changes to interested subsystems.
//!
//! - [`CacheController`]: the cache and its accessors
//! - [`announcements`]: per-kind bounded fan-out
//! - [`WatchSource`]: the watch feed the cache consumes
//! - [`FakeClusterApi`]: an in-memory cluster implementing [`WatchSource`]

pub mod announcements;
pub mod controller;
pub mod fake;
pub mod types;
pub mod watch;

pub use announcements::{Announcement, AnnouncementBus, AnnouncementType, Announcements, Resource};
pub use controller::CacheController;
pub use fake::FakeClusterApi;
pub use types::{
    MeshService, Namespace, ResourceKind, Service, ServicePort, ServiceSpec, MONITOR_LABEL,
};
pub use watch::{WatchEvent, WatchSource};
