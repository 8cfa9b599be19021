//! # Certificates
//!
//! Issuance, caching, and renewal of workload identity certificates.
//!
//! - [`pem`]: decoding and encoding of PEM material
//! - [`Certificate`]: one issued identity, with the renewal predicate
//! - [`providers`]: the signing backends behind one [`CertificateIssuer`] contract
//! - [`manager`]: the per-common-name cache and the renewal loop

pub mod jitter;
pub mod manager;
pub mod pem;
pub mod providers;
pub mod types;

pub use jitter::{FixedJitter, JitterSource, RandomJitter, NOISE_SECONDS};
pub use manager::{CertificateManager, RotationSummary};
pub use providers::{CertificateIssuer, Provider, ProviderContext};
pub use types::{
    Certificate, CommonName, RootCertificate, SerialNumber, RENEW_BEFORE_CERT_EXPIRES,
};
