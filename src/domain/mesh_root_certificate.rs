//! The `MeshRootCertificate` resource.
//!
//! One object per mesh describes which provider owns the root of trust. Its
//! status records how far a root rotation has progressed: `state` is the
//! overall lifecycle and `rotationStage` is how the root is currently being
//! consumed. The two fields only make sense together; [`MeshRootCertificateStatus::phase`]
//! is the single way to interpret them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::meta::{ListMeta, ObjectMeta, TypeMeta};
use crate::config::ProviderSpec;

pub const API_VERSION: &str = "config.meshplane.io/v1alpha2";
pub const KIND: &str = "MeshRootCertificate";
pub const LIST_KIND: &str = "MeshRootCertificateList";

/// Overall rotation lifecycle of a root certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootState {
    /// No root issued yet
    Init,
    /// New root issued, not yet trusted by all peers
    IssuingRollout,
    /// New root distributed alongside the old one
    RollingOut,
    /// Rollout abandoned; new root being withdrawn
    RollingBack,
    /// Old roots retired
    Completed,
    /// Steady state
    Active,
    /// Undefined status reached; requires manual intervention
    Error,
}

impl RootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::IssuingRollout => "issuing-rollout",
            Self::RollingOut => "rolling-out",
            Self::RollingBack => "rolling-back",
            Self::Completed => "completed",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl FromStr for RootState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // A freshly created object has no status yet.
            "" | "init" => Ok(Self::Init),
            "issuing-rollout" => Ok(Self::IssuingRollout),
            "rolling-out" => Ok(Self::RollingOut),
            "rolling-back" => Ok(Self::RollingBack),
            "completed" => Ok(Self::Completed),
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown root certificate state: {}", s)),
        }
    }
}

impl fmt::Display for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the root is consumed by peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationStage {
    /// No stage recorded
    Unset,
    /// Root issued, not distributed
    Pending,
    /// Trusted alongside the previous root
    DualTrust,
    /// The only trusted root
    SoleTrust,
    /// No longer trusted
    Retired,
}

impl RotationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Pending => "pending",
            Self::DualTrust => "dual-trust",
            Self::SoleTrust => "sole-trust",
            Self::Retired => "retired",
        }
    }
}

impl FromStr for RotationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Unset),
            "pending" => Ok(Self::Pending),
            "dual-trust" => Ok(Self::DualTrust),
            "sole-trust" => Ok(Self::SoleTrust),
            "retired" => Ok(Self::Retired),
            _ => Err(format!("Unknown rotation stage: {}", s)),
        }
    }
}

impl fmt::Display for RotationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshRootCertificateSpec {
    pub provider: ProviderSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshRootCertificateStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub rotation_stage: String,
}

impl MeshRootCertificateStatus {
    pub fn new(state: RootState, stage: RotationStage) -> Self {
        Self { state: state.as_str().to_string(), rotation_stage: stage.as_str().to_string() }
    }

    /// Read `state` and `rotationStage` together. Unknown strings in either
    /// field are reported as an error.
    pub fn phase(&self) -> Result<(RootState, RotationStage), String> {
        Ok((self.state.parse()?, self.rotation_stage.parse()?))
    }
}

/// Cluster-persisted root certificate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshRootCertificate {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MeshRootCertificateSpec,
    #[serde(default)]
    pub status: MeshRootCertificateStatus,
}

impl MeshRootCertificate {
    pub fn new(name: impl Into<String>, provider: ProviderSpec) -> Self {
        Self {
            type_meta: TypeMeta { api_version: API_VERSION.to_string(), kind: KIND.to_string() },
            metadata: ObjectMeta::named(name),
            spec: MeshRootCertificateSpec { provider },
            status: MeshRootCertificateStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// A list of [`MeshRootCertificate`] objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshRootCertificateList {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ListMeta,
    pub items: Vec<MeshRootCertificate>,
}

impl MeshRootCertificateList {
    pub fn new(items: Vec<MeshRootCertificate>, resource_version: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta {
                api_version: API_VERSION.to_string(),
                kind: LIST_KIND.to_string(),
            },
            metadata: ListMeta { resource_version: resource_version.into(), continue_token: None },
            items,
        }
    }
}
