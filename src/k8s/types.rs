//! Cluster objects mirrored by the resource cache.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ObjectMeta;

/// Label whose value names the mesh a namespace belongs to.
pub const MONITOR_LABEL: &str = "meshplane.io/monitored-by";

/// Resource kinds with their own announcement bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespaces,
    Services,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Namespaces, ResourceKind::Services];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespaces => "namespaces",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { metadata: ObjectMeta::named(name) }
    }

    /// Mark the namespace as a member of `mesh_name`.
    pub fn monitored_by(mut self, mesh_name: impl Into<String>) -> Self {
        self.metadata.labels.insert(MONITOR_LABEL.to_string(), mesh_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_monitored_by(&self, mesh_name: &str) -> bool {
        self.metadata.label(MONITOR_LABEL) == Some(mesh_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

impl ServicePort {
    pub fn tcp(port: u16) -> Self {
        Self { name: None, port, protocol: default_protocol(), target_port: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl Service {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { metadata: ObjectMeta::namespaced(namespace, name), spec: ServiceSpec::default() }
    }

    pub fn with_port(mut self, port: ServicePort) -> Self {
        self.spec.ports.push(port);
        self
    }

    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.selector.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn mesh_service(&self) -> MeshService {
        MeshService::new(self.namespace(), self.name())
    }
}

/// A service identity within the mesh, addressed as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshService {
    pub namespace: String,
    pub name: String,
}

impl MeshService {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
