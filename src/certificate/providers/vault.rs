//! Vault PKI backed provider.
//!
//! Certificates are generated by the PKI secrets engine mounted at
//! `spec.mount` using the configured role. Vault generates the key pair and
//! returns it with the certificate. The token is read from the referenced
//! secret once, when the provider is built.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};
use vaultrs::api::pki::requests::GenerateCertificateRequestBuilder;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;

use super::{secret_error, CertificateIssuer, ProviderContext};
use crate::certificate::types::{Certificate, CommonName, RootCertificate};
use crate::config::{ProviderKind, VaultProviderSpec};
use crate::errors::IssuanceError;
use crate::secrets::SecretString;

const PROVIDER: ProviderKind = ProviderKind::Vault;

/// Provider issuing through a Vault PKI role.
pub struct VaultProvider {
    client: VaultClient,
    address: String,
    role: String,
    mount: String,
}

impl fmt::Debug for VaultProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultProvider")
            .field("address", &self.address)
            .field("role", &self.role)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

impl VaultProvider {
    /// Build a client for `spec`, resolving a token secret reference through
    /// the context's secret store. No request is sent to Vault until the
    /// first issuance.
    pub async fn connect(
        spec: &VaultProviderSpec,
        ctx: &ProviderContext,
    ) -> Result<Self, IssuanceError> {
        let token = resolve_token(spec, ctx).await?;
        Self::with_token(spec, &token)
    }

    /// Build a client for `spec` using its inline token.
    pub fn new(spec: &VaultProviderSpec) -> Result<Self, IssuanceError> {
        Self::with_token(spec, &spec.token)
    }

    fn with_token(spec: &VaultProviderSpec, token: &SecretString) -> Result<Self, IssuanceError> {
        let address = spec.address();

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&address);
        settings_builder.token(token.expose_secret());

        let settings = settings_builder.build().map_err(|e| {
            IssuanceError::invalid_config(
                PROVIDER.as_str(),
                format!("Invalid Vault configuration: {}", e),
            )
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            IssuanceError::invalid_config(
                PROVIDER.as_str(),
                format!("Failed to create Vault client: {}", e),
            )
        })?;

        info!(
            vault_addr = %address,
            pki_mount = %spec.mount,
            pki_role = %spec.role,
            "Vault PKI provider configured"
        );

        Ok(Self { client, address, role: spec.role.clone(), mount: spec.mount.clone() })
    }

    /// Check that Vault is reachable and unsealed.
    pub async fn health_check(&self) -> Result<(), IssuanceError> {
        vaultrs::sys::health(&self.client).await.map(|_| ()).map_err(|e| {
            error!(error = %e, vault_addr = %self.address, "Vault health check failed");
            IssuanceError::unavailable(PROVIDER.as_str(), format!("health check failed: {}", e))
        })
    }
}

async fn resolve_token(
    spec: &VaultProviderSpec,
    ctx: &ProviderContext,
) -> Result<SecretString, IssuanceError> {
    let Some(reference) = &spec.token_secret_ref else {
        return Ok(spec.token.clone());
    };

    let entry = ctx
        .secrets
        .get_secret_entry(&ctx.namespace, &reference.name, &reference.key)
        .await
        .map_err(|e| secret_error(PROVIDER, e))?;
    let token = entry.expose_str().map(str::trim).filter(|token| !token.is_empty());
    let Some(token) = token else {
        return Err(IssuanceError::invalid_config(
            PROVIDER.as_str(),
            format!(
                "secret {}/{} entry '{}' does not hold a token",
                ctx.namespace, reference.name, reference.key
            ),
        ));
    };

    debug!(secret = %reference.name, key = %reference.key, "Read Vault token from secret");
    Ok(SecretString::new(token))
}

/// Classify a Vault client error.
///
/// 4xx responses other than auth failures mean the role refused the request.
/// Everything else (transport, auth, 5xx) may succeed on a later attempt.
fn classify(error: ClientError, common_name: &CommonName) -> IssuanceError {
    match error {
        ClientError::APIError { code, errors }
            if (400..500).contains(&code) && code != 401 && code != 403 =>
        {
            IssuanceError::rejected(PROVIDER.as_str(), common_name.as_str(), errors.join("; "))
        }
        other => IssuanceError::unavailable(PROVIDER.as_str(), other.to_string()),
    }
}

#[async_trait]
impl CertificateIssuer for VaultProvider {
    #[instrument(skip(self), fields(provider = "vault", common_name = %common_name))]
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, IssuanceError> {
        let mut opts = GenerateCertificateRequestBuilder::default();
        opts.common_name(common_name.to_string());
        opts.ttl(format!("{}s", validity.as_secs()));

        let response =
            vaultrs::pki::cert::generate(&self.client, &self.mount, &self.role, Some(&mut opts))
                .await
                .map_err(|e| classify(e, common_name))?;

        // Expiration comes from the decoded certificate, not the response field.
        let certificate = Certificate::from_issued(
            response.certificate.as_bytes(),
            response.private_key.as_bytes(),
            response.issuing_ca.as_bytes(),
        )?;

        debug!(serial_number = %certificate.serial_number(), "Issued certificate");
        Ok(certificate)
    }

    async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError> {
        let response = vaultrs::pki::cert::read(&self.client, &self.mount, "ca")
            .await
            .map_err(|e| IssuanceError::unavailable(PROVIDER.as_str(), e.to_string()))?;
        Ok(RootCertificate::from_pem(response.certificate.as_bytes())?)
    }

    fn kind(&self) -> ProviderKind {
        PROVIDER
    }
}
