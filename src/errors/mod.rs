//! # Error Handling
//!
//! Error taxonomy for the meshplane trust and cluster-state core, built with
//! `thiserror`.
//!
//! - [`DecodeError`]: malformed certificate or key bytes. Fatal to the
//!   operation, logged with a stable error code, never retried automatically.
//! - [`IssuanceError`]: provider backend failure. Retried on the next renewal
//!   tick, surfaced immediately to a synchronous caller.
//! - [`ConfigError`]: malformed or contradictory provider configuration. Fatal
//!   at startup.
//! - [`ConflictError`]: optimistic-concurrency conflict on the root-certificate
//!   status that outlived the retry budget.
//! - [`SyncTimeoutError`]: the resource cache did not reach its initial sync.
//!
//! Module-level errors convert into [`MeshplaneError`] so that callers who do
//! not care about the category can use the crate-wide [`Result`].

pub mod certificate;
pub mod cluster;
pub mod types;

pub use certificate::{DecodeError, IssuanceError};
pub use cluster::{ConflictError, StoreError, SyncTimeoutError};
pub use types::{ConfigError, MeshplaneError, Result};
