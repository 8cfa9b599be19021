//! Domain layer
//!
//! Cluster-persisted resource types with no infrastructure dependencies.
//!
//! ## Module Organization
//!
//! - `meta`: object, type, and list metadata shared by persisted resources
//! - `mesh_root_certificate`: the root-of-trust configuration object and its
//!   status vocabulary

pub mod mesh_root_certificate;
pub mod meta;

pub use mesh_root_certificate::{
    MeshRootCertificate, MeshRootCertificateList, MeshRootCertificateSpec,
    MeshRootCertificateStatus, RootState, RotationStage,
};
pub use meta::{ListMeta, ObjectMeta, TypeMeta};
