//! Built-in certificate authority.
//!
//! The root certificate and key are kept in a cluster secret so every
//! control-plane replica signs with the same root. When the secret does not
//! exist yet, a new self-signed root is generated and persisted.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber as RcgenSerial,
};
use tracing::{debug, info, instrument};

use super::{secret_error, CertificateIssuer, ProviderContext};
use crate::certificate::types::{Certificate, CommonName, RootCertificate};
use crate::config::{ProviderKind, TresorProviderSpec};
use crate::errors::IssuanceError;
use crate::secrets::{SecretData, SecretStore, SecretsError, CA_CERT_KEY, PRIVATE_KEY_KEY};

const PROVIDER: ProviderKind = ProviderKind::Tresor;

/// Common name of generated roots.
pub const ROOT_COMMON_NAME: &str = "meshplane-root";

/// Organization written into every certificate this authority signs.
pub const ORGANIZATION: &str = "meshplane";

/// Validity of a generated root: ten years.
pub const ROOT_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Signing material loaded from, or persisted to, the root secret.
struct RootAuthority {
    issuer: rcgen::Certificate,
    key: KeyPair,
    root: RootCertificate,
}

impl fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootAuthority")
            .field("serial_number", self.root.serial_number())
            .field("expiration", &self.root.expiration())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl RootAuthority {
    fn load(cert_pem: &str, key_pem: &str) -> Result<Self, IssuanceError> {
        let root = RootCertificate::from_pem(cert_pem.as_bytes()).map_err(|e| {
            IssuanceError::invalid_config(PROVIDER.as_str(), format!("invalid root: {}", e))
        })?;
        let key = KeyPair::from_pem(key_pem).map_err(|e| {
            IssuanceError::invalid_config(PROVIDER.as_str(), format!("invalid root key: {}", e))
        })?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(|e| {
            IssuanceError::invalid_config(PROVIDER.as_str(), format!("invalid root: {}", e))
        })?;
        // Re-signing the parsed params yields an issuer with the root's subject
        // and key identifier. Leaves reference `root`, not this re-signed copy.
        let issuer = params.self_signed(&key).map_err(|e| {
            IssuanceError::invalid_config(PROVIDER.as_str(), format!("root key mismatch: {}", e))
        })?;
        Ok(Self { issuer, key, root })
    }

    fn generate() -> Result<(Self, String), IssuanceError> {
        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(rejected_root)?;
        params.distinguished_name.push(DnType::CommonName, ROOT_COMMON_NAME);
        params.distinguished_name.push(DnType::OrganizationName, ORGANIZATION);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.serial_number = Some(random_serial());
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ROOT_VALIDITY;

        let key = KeyPair::generate().map_err(rejected_root)?;
        let issuer = params.self_signed(&key).map_err(rejected_root)?;
        let cert_pem = issuer.pem();
        let root = RootCertificate::from_pem(cert_pem.as_bytes())?;
        Ok((Self { issuer, key, root }, cert_pem))
    }
}

fn rejected_root(error: rcgen::Error) -> IssuanceError {
    IssuanceError::rejected(PROVIDER.as_str(), ROOT_COMMON_NAME, error.to_string())
}

/// Positive 128-bit serial number.
fn random_serial() -> RcgenSerial {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[0] &= 0x7f;
    RcgenSerial::from_slice(&bytes)
}

/// Internal authority provider.
#[derive(Debug)]
pub struct TresorProvider {
    authority: RootAuthority,
}

impl TresorProvider {
    /// Load the root from `spec.secret_name`, generating it if absent.
    pub async fn new(
        spec: &TresorProviderSpec,
        ctx: &ProviderContext,
    ) -> Result<Self, IssuanceError> {
        let authority =
            load_or_create(ctx.secrets.as_ref(), &ctx.namespace, &spec.secret_name).await?;
        Ok(Self { authority })
    }
}

async fn load_or_create(
    secrets: &dyn SecretStore,
    namespace: &str,
    secret_name: &str,
) -> Result<RootAuthority, IssuanceError> {
    match read_root(secrets, namespace, secret_name).await {
        Ok(authority) => {
            debug!(
                secret = %secret_name,
                serial_number = %authority.root.serial_number(),
                "Loaded root certificate"
            );
            return Ok(authority);
        }
        Err(SecretLookup::Missing) => {}
        Err(SecretLookup::Failed(e)) => return Err(e),
    }

    let (authority, cert_pem) = RootAuthority::generate()?;
    let data = SecretData::new()
        .with_entry(CA_CERT_KEY, cert_pem)
        .with_entry(PRIVATE_KEY_KEY, authority.key.serialize_pem());

    match secrets.create_secret(namespace, secret_name, data).await {
        Ok(()) => {
            info!(
                namespace = %namespace,
                secret = %secret_name,
                serial_number = %authority.root.serial_number(),
                "Generated and stored new root certificate"
            );
            Ok(authority)
        }
        // Another replica stored a root first; use theirs.
        Err(SecretsError::AlreadyExists { .. }) => read_root(secrets, namespace, secret_name)
            .await
            .map_err(|e| match e {
                SecretLookup::Missing => IssuanceError::unavailable(
                    PROVIDER.as_str(),
                    format!("root secret {}/{} vanished after conflict", namespace, secret_name),
                ),
                SecretLookup::Failed(e) => e,
            }),
        Err(e) => Err(secret_error(PROVIDER, e)),
    }
}

enum SecretLookup {
    Missing,
    Failed(IssuanceError),
}

async fn read_root(
    secrets: &dyn SecretStore,
    namespace: &str,
    secret_name: &str,
) -> Result<RootAuthority, SecretLookup> {
    let data = match secrets.get_secret(namespace, secret_name).await {
        Ok(data) => data,
        Err(SecretsError::NotFound { .. }) => return Err(SecretLookup::Missing),
        Err(e) => return Err(SecretLookup::Failed(secret_error(PROVIDER, e))),
    };

    let entry = |key: &str| -> Result<String, SecretLookup> {
        data.get(key)
            .and_then(|value| value.expose_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SecretLookup::Failed(secret_error(
                    PROVIDER,
                    SecretsError::missing_key(namespace, secret_name, key),
                ))
            })
    };

    let cert_pem = entry(CA_CERT_KEY)?;
    let key_pem = entry(PRIVATE_KEY_KEY)?;
    RootAuthority::load(&cert_pem, &key_pem).map_err(SecretLookup::Failed)
}

#[async_trait]
impl CertificateIssuer for TresorProvider {
    #[instrument(skip(self), fields(provider = "tresor", common_name = %common_name))]
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, IssuanceError> {
        let rejected = |e: rcgen::Error| {
            IssuanceError::rejected(PROVIDER.as_str(), common_name.as_str(), e.to_string())
        };

        let mut params = CertificateParams::new(vec![common_name.to_string()]).map_err(rejected)?;
        params.distinguished_name.push(DnType::CommonName, common_name.as_str());
        params.distinguished_name.push(DnType::OrganizationName, ORGANIZATION);
        params.key_usages =
            vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial());
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + validity;

        let key = KeyPair::generate().map_err(rejected)?;
        let cert = params
            .signed_by(&key, &self.authority.issuer, &self.authority.key)
            .map_err(rejected)?;

        let certificate = Certificate::from_issued(
            cert.pem().as_bytes(),
            key.serialize_pem().as_bytes(),
            self.authority.root.pem().as_bytes(),
        )?;

        debug!(
            serial_number = %certificate.serial_number(),
            expiration = %certificate.expiration(),
            "Issued certificate"
        );
        Ok(certificate)
    }

    async fn root_certificate(&self) -> Result<RootCertificate, IssuanceError> {
        Ok(self.authority.root.clone())
    }

    fn kind(&self) -> ProviderKind {
        PROVIDER
    }
}
