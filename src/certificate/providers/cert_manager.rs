//! cert-manager backed provider.
//!
//! Each issuance generates a key pair locally, submits a `CertificateRequest`
//! that references the configured issuer, polls until the request is ready,
//! denied, or out of time, and then deletes the request. The private key never
//! leaves the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{secret_error, CertificateIssuer, ProviderContext};
use crate::certificate::types::{Certificate, CommonName, RootCertificate};
use crate::config::{CertManagerProviderSpec, ProviderKind};
use crate::errors::IssuanceError;
use crate::secrets::CA_CERT_KEY;
use crate::utils::BackoffPolicy;

const PROVIDER: ProviderKind = ProviderKind::CertManager;

/// Reference to the cert-manager issuer that signs requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// PEM-encoded PKCS#10 request
    pub request: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub issuer_ref: IssuerRef,
    pub is_ca: bool,
    pub usages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestConditionType {
    Ready,
    Denied,
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCondition {
    #[serde(rename = "type")]
    pub condition_type: RequestConditionType,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequestStatus {
    /// Signed certificate PEM, set once the request is ready
    #[serde(default)]
    pub certificate: Option<String>,
    /// PEM of the CA that signed the certificate
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}

/// A cert-manager `CertificateRequest` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub name: String,
    pub namespace: String,
    pub spec: CertificateRequestSpec,
    #[serde(default)]
    pub status: CertificateRequestStatus,
}

impl CertificateRequest {
    fn condition(&self, condition_type: RequestConditionType) -> Option<&RequestCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type && c.status)
    }

    /// The first condition that means the request will never be signed.
    pub fn failure(&self) -> Option<&RequestCondition> {
        self.condition(RequestConditionType::Denied)
            .or_else(|| self.condition(RequestConditionType::InvalidRequest))
            .or_else(|| {
                self.status.conditions.iter().find(|c| {
                    c.condition_type == RequestConditionType::Ready
                        && !c.status
                        && c.reason == "Failed"
                })
            })
    }

    /// The signed certificate, once the request is ready.
    pub fn ready_certificate(&self) -> Option<&str> {
        self.condition(RequestConditionType::Ready)?;
        self.status.certificate.as_deref().filter(|cert| !cert.is_empty())
    }
}

/// Client for cert-manager `CertificateRequest` objects.
#[async_trait]
pub trait CertificateRequestClient: Send + Sync + std::fmt::Debug {
    async fn create(&self, request: CertificateRequest)
        -> Result<CertificateRequest, IssuanceError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<CertificateRequest, IssuanceError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), IssuanceError>;
}

/// Provider that delegates signing to a cert-manager issuer.
#[derive(Debug)]
pub struct CertManagerProvider {
    spec: CertManagerProviderSpec,
    namespace: String,
    client: Arc<dyn CertificateRequestClient>,
    root: RootCertificate,
    poll: BackoffPolicy,
}

impl CertManagerProvider {
    /// Resolve the issuer's root from `spec.secret_name`.
    pub async fn new(
        spec: &CertManagerProviderSpec,
        ctx: &ProviderContext,
    ) -> Result<Self, IssuanceError> {
        let client = ctx.certificate_requests.clone().ok_or_else(|| {
            IssuanceError::invalid_config(PROVIDER.as_str(), "no CertificateRequest client")
        })?;

        let ca = ctx
            .secrets
            .get_secret_entry(&ctx.namespace, &spec.secret_name, CA_CERT_KEY)
            .await
            .map_err(|e| secret_error(PROVIDER, e))?;
        let root = RootCertificate::from_pem(ca.expose_secret()).map_err(|e| {
            IssuanceError::invalid_config(PROVIDER.as_str(), format!("invalid root: {}", e))
        })?;

        debug!(
            issuer = %spec.issuer_name,
            issuer_kind = %spec.issuer_kind,
            serial_number = %root.serial_number(),
            "Resolved cert-manager issuer root"
        );

        Ok(Self {
            spec: spec.clone(),
            namespace: ctx.namespace.clone(),
            client,
            root,
            poll: ctx.poll.clone(),
        })
    }

    fn build_request(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<(CertificateRequest, KeyPair), IssuanceError> {
        let rejected = |e: rcgen::Error| {
            IssuanceError::rejected(PROVIDER.as_str(), common_name.as_str(), e.to_string())
        };

        let mut params = CertificateParams::new(vec![common_name.to_string()]).map_err(rejected)?;
        params.distinguished_name.push(DnType::CommonName, common_name.as_str());
        let key = KeyPair::generate().map_err(rejected)?;
        let csr = params.serialize_request(&key).map_err(rejected)?.pem().map_err(rejected)?;

        let request = CertificateRequest {
            name: format!("meshplane-{}", Uuid::new_v4()),
            namespace: self.namespace.clone(),
            spec: CertificateRequestSpec {
                request: csr,
                duration: validity,
                issuer_ref: IssuerRef {
                    name: self.spec.issuer_name.clone(),
                    kind: self.spec.issuer_kind.clone(),
                    group: self.spec.issuer_group.clone(),
                },
                is_ca: false,
                usages: vec![
                    "digital signature".to_string(),
                    "key encipherment".to_string(),
                    "server auth".to_string(),
                    "client auth".to_string(),
                ],
            },
            status: CertificateRequestStatus::default(),
        };
        Ok((request, key))
    }

    async fn await_signed(
        &self,
        common_name: &CommonName,
        name: &str,
    ) -> Result<(String, Option<String>), IssuanceError> {
        for attempt in 0..self.poll.max_attempts {
            self.poll.wait(attempt).await;

            let request = self.client.get(&self.namespace, name).await?;
            if let Some(failure) = request.failure() {
                return Err(IssuanceError::rejected(
                    PROVIDER.as_str(),
                    common_name.as_str(),
                    format!("{}: {}", failure.reason, failure.message),
                ));
            }
            if let Some(cert) = request.ready_certificate() {
                return Ok((cert.to_string(), request.status.ca.clone()));
            }
            debug!(request = %name, attempt, "CertificateRequest not ready yet");
        }

        Err(IssuanceError::Timeout {
            provider: PROVIDER.as_str(),
            common_name: common_name.to_string(),
            waited: self.poll.total_budget(),
        })
    }
}

#[async_trait]
impl CertificateIssuer for CertManagerProvider {
    #[instrument(skip(self), fields(provider = "cert-manager", common_name = %common_name))]
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, IssuanceError> {
        let (request, key) = self.build_request(common_name, validity)?;
        let name = request.name.clone();
        self.client.create(request).await?;

        let signed = self.await_signed(common_name, &name).await;

        if let Err(e) = self.client.delete(&self.namespace, &name).await {
            warn!(request = %name, error = %e, "Failed to delete CertificateRequest");
        }

        let (cert_pem, ca_pem) = signed?;
        let issuing_ca = ca_pem.unwrap_or_else(|| self.root.pem().to_string());
        let certificate = Certificate::from_issued(
            cert_pem.as_bytes(),
            key.serialize_pem().as_bytes(),
            issuing_ca.as_bytes(),
        )?;

        debug!(serial_number = %certificate.serial_number(), "Issued certificate");
        Ok(certificate)
    }

    async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError> {
        Ok(self.root.clone())
    }

    fn kind(&self) -> ProviderKind {
        PROVIDER
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
