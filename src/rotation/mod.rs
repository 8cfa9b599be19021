//! # Root Certificate Rotation
//!
//! Cluster-wide root-of-trust transitions, driven by the persisted
//! `MeshRootCertificate` status:
//!
//! - [`state`]: the transition table
//! - [`RootRotationController`]: reconciles objects one step at a time
//! - [`TrustBundle`]: the roots peers currently trust
//! - [`RootCertificateStore`]: optimistic-concurrency persistence
//! - [`RootIssuer`]: resolves the root of a provider configuration

pub mod bundle;
pub mod controller;
pub mod issuer;
pub mod state;
pub mod store;

pub use bundle::TrustBundle;
pub use controller::{
    ReconcileOutcome, RootRotationController, ISSUED_PROVIDER_ANNOTATION,
    ISSUED_ROOT_ANNOTATION, ISSUED_ROOT_SERIAL_ANNOTATION, PREVIOUS_PROVIDER_ANNOTATION,
    PREVIOUS_ROOT_ANNOTATION, PREVIOUS_ROOT_SERIAL_ANNOTATION,
};
pub use issuer::{ProviderRootIssuer, RootIssuer};
pub use state::{plan, Observed, RotationAction, Step};
pub use store::{InMemoryRootStore, RootCertificateStore};
