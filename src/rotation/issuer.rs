//! Resolution of the root certificate a provider configuration signs with.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::certificate::{CertificateIssuer, Provider, ProviderContext, RootCertificate};
use crate::config::ProviderConfig;
use crate::errors::IssuanceError;

/// Resolves the root certificate of a provider configuration.
///
/// Must be idempotent: resolving the same configuration twice yields the same
/// root, so a reconcile step that is retried after a write conflict does not
/// mint a second root.
#[async_trait]
pub trait RootIssuer: Send + Sync + Debug {
    async fn resolve_root(&self, config: &ProviderConfig) -> Result<RootCertificate, IssuanceError>;
}

/// [`RootIssuer`] that builds the configured [`Provider`] and asks it for its
/// trust anchor. The internal authority persists a generated root in its
/// secret, so repeated calls return the stored root.
#[derive(Debug, Clone)]
pub struct ProviderRootIssuer {
    ctx: ProviderContext,
}

impl ProviderRootIssuer {
    pub fn new(ctx: ProviderContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RootIssuer for ProviderRootIssuer {
    #[tracing::instrument(skip_all, fields(provider = %config.kind()))]
    async fn resolve_root(
        &self,
        config: &ProviderConfig,
    ) -> Result<RootCertificate, IssuanceError> {
        let provider = Provider::from_config(config, &self.ctx).await?;
        provider.root_certificate().await
    }
}
