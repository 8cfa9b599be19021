//! The watch feed the resource cache consumes.
//!
//! A watch starts with a full listing, `Init`, one `InitApply` per existing
//! object, then `InitDone`, and continues with live `Apply`/`Delete` events.
//! A source may relist at any time by emitting a new `Init` sequence; objects
//! absent from the relist are treated as deleted.

use std::fmt::Debug;

use futures::stream::BoxStream;

use super::types::{Namespace, Service};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    /// A full listing begins.
    Init,
    /// An object present in the listing.
    InitApply(T),
    /// The listing is complete.
    InitDone,
    /// An object was created or modified.
    Apply(T),
    /// An object was deleted.
    Delete(T),
}

/// Supplies one watch stream per resource kind.
pub trait WatchSource: Send + Sync + Debug {
    fn watch_namespaces(&self) -> BoxStream<'static, WatchEvent<Namespace>>;

    fn watch_services(&self) -> BoxStream<'static, WatchEvent<Service>>;
}
