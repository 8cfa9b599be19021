//! Secret storage for certificate authority material.
//!
//! Root certificates and their private keys live in cluster secrets. The
//! internal authority reads (or creates) its signing pair from a named secret,
//! and the cert-manager provider reads the root it trusts from one.
//!
//! # Architecture
//!
//! The secrets system is built around the [`SecretStore`] trait, which provides
//! a backend-agnostic interface over namespaced secrets:
//! - **get_secret**: Retrieve all data entries of a secret
//! - **create_secret**: Store a new secret, failing if it already exists
//! - **delete_secret**: Remove a secret
//!
//! [`InMemorySecretStore`] backs tests and single-process deployments.
//!
//! # Security Considerations
//!
//! - Secret values are held in [`SecretBytes`], which redacts itself in
//!   `Debug`, `Display` and serialization and zeroes its memory on drop
//! - Secret values are never logged or included in error messages

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{SecretData, SecretStore, CA_CERT_KEY, PRIVATE_KEY_KEY};
pub use error::{Result, SecretsError};
pub use memory::InMemorySecretStore;
pub use types::{SecretBytes, SecretString};
