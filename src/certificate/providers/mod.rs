//! # Certificate Providers
//!
//! One issuance contract over three signing backends:
//!
//! - [`TresorProvider`]: a built-in authority whose root lives in a cluster secret
//! - [`CertManagerProvider`]: delegates signing to a cert-manager issuer
//! - [`VaultProvider`]: signs through a Vault PKI secrets engine
//!
//! Exactly one is active per process. [`Provider`] is the sum type callers
//! hold; it dispatches to the selected variant.

pub mod cert_manager;
pub mod tresor;
pub mod vault;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use cert_manager::{
    CertManagerProvider, CertificateRequest, CertificateRequestClient, CertificateRequestSpec,
    CertificateRequestStatus, IssuerRef, RequestCondition, RequestConditionType,
};
pub use tresor::TresorProvider;
pub use vault::VaultProvider;

use super::types::{Certificate, CommonName, RootCertificate};
use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::IssuanceError;
use crate::secrets::{SecretStore, SecretsError};
use crate::utils::BackoffPolicy;

/// The issuance capability every backend implements.
#[async_trait]
pub trait CertificateIssuer: Send + Sync + Debug {
    /// Issue a certificate for `common_name` valid for `validity`.
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, IssuanceError>;

    /// The root certificate peers should trust for certificates from this issuer.
    async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError>;

    fn kind(&self) -> ProviderKind;
}

/// Collaborators a provider needs to resolve its trust material.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Namespace holding provider secrets and certificate requests
    pub namespace: String,
    pub secrets: Arc<dyn SecretStore>,
    /// Required by the cert-manager provider only
    pub certificate_requests: Option<Arc<dyn CertificateRequestClient>>,
    /// Polling policy for asynchronous signers
    pub poll: BackoffPolicy,
}

impl ProviderContext {
    pub fn new(namespace: impl Into<String>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            namespace: namespace.into(),
            secrets,
            certificate_requests: None,
            poll: BackoffPolicy {
                max_attempts: 10,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(5),
                backoff_multiplier: 2.0,
            },
        }
    }

    pub fn with_certificate_requests(mut self, client: Arc<dyn CertificateRequestClient>) -> Self {
        self.certificate_requests = Some(client);
        self
    }

    pub fn with_poll(mut self, poll: BackoffPolicy) -> Self {
        self.poll = poll;
        self
    }
}

/// The active certificate provider.
#[derive(Debug)]
pub enum Provider {
    Tresor(TresorProvider),
    CertManager(CertManagerProvider),
    Vault(VaultProvider),
}

impl Provider {
    /// Build the provider selected by `config`, resolving its trust material.
    #[tracing::instrument(skip_all, fields(provider = %config.kind()))]
    pub async fn from_config(
        config: &ProviderConfig,
        ctx: &ProviderContext,
    ) -> Result<Self, IssuanceError> {
        let provider = match config {
            ProviderConfig::Tresor(spec) => Provider::Tresor(TresorProvider::new(spec, ctx).await?),
            ProviderConfig::CertManager(spec) => {
                Provider::CertManager(CertManagerProvider::new(spec, ctx).await?)
            }
            ProviderConfig::Vault(spec) => {
                Provider::Vault(VaultProvider::connect(spec, ctx).await?)
            }
        };

        tracing::info!(provider = %provider.kind(), "Certificate provider initialized");
        Ok(provider)
    }

    fn issuer(&self) -> &dyn CertificateIssuer {
        match self {
            Provider::Tresor(p) => p,
            Provider::CertManager(p) => p,
            Provider::Vault(p) => p,
        }
    }
}

#[async_trait]
impl CertificateIssuer for Provider {
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, IssuanceError> {
        self.issuer().issue(common_name, validity).await
    }

    async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError> {
        self.issuer().root_certificate().await
    }

    fn kind(&self) -> ProviderKind {
        self.issuer().kind()
    }
}

/// Map a secret store failure while resolving trust material.
///
/// Transient store errors are retryable; a missing or malformed secret is a
/// configuration problem.
pub(crate) fn secret_error(provider: ProviderKind, error: SecretsError) -> IssuanceError {
    crate::observability::log_error(
        crate::observability::ErrorCode::SecretUnavailable,
        &error,
        "Failed to read provider secret",
    );
    if error.is_transient() {
        IssuanceError::unavailable(provider.as_str(), error.to_string())
    } else {
        IssuanceError::invalid_config(provider.as_str(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TresorProviderSpec, VaultProviderSpec};
    use crate::secrets::{InMemorySecretStore, SecretString};

    fn context() -> ProviderContext {
        ProviderContext::new("mesh-system", Arc::new(InMemorySecretStore::new()))
    }

    #[tokio::test]
    async fn test_from_config_selects_variant() {
        let config =
            ProviderConfig::Tresor(TresorProviderSpec { secret_name: "mesh-root".to_string() });
        let provider = Provider::from_config(&config, &context()).await.unwrap();
        assert_eq!(provider.kind(), ProviderKind::Tresor);

        let config = ProviderConfig::Vault(VaultProviderSpec {
            host: "vault.internal".to_string(),
            role: "mesh".to_string(),
            token: SecretString::new("token"),
            ..Default::default()
        });
        let provider = Provider::from_config(&config, &context()).await.unwrap();
        assert_eq!(provider.kind(), ProviderKind::Vault);
    }

    #[tokio::test]
    async fn test_issue_dispatches_through_sum_type() {
        let config =
            ProviderConfig::Tresor(TresorProviderSpec { secret_name: "mesh-root".to_string() });
        let provider = Provider::from_config(&config, &context()).await.unwrap();

        let cert = provider
            .issue(&CommonName::from("bookstore.default.svc"), Duration::from_secs(3600))
            .await
            .unwrap();
        let root = provider.root_certificate().await.unwrap();
        assert_eq!(cert.issuing_ca(), root.pem());
    }

    #[test]
    fn test_secret_error_classification() {
        let err = secret_error(ProviderKind::Tresor, SecretsError::connection_failed("refused"));
        assert!(err.is_retryable());

        let missing = SecretsError::missing_key("ns", "s", "ca.crt");
        let err = secret_error(ProviderKind::Tresor, missing);
        assert!(matches!(err, IssuanceError::InvalidConfig { .. }));
    }
}
