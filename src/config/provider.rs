//! Certificate provider configuration.
//!
//! The same shape is used in the process configuration file and in the
//! `spec.provider` field of a [`MeshRootCertificate`](crate::domain::MeshRootCertificate).
//! Exactly one provider section must be populated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::secrets::SecretString;

/// Default Vault API port.
pub const DEFAULT_VAULT_PORT: u16 = 8200;

/// Default mount path of the Vault PKI secrets engine.
pub const DEFAULT_VAULT_MOUNT: &str = "pki";

/// Default entry of the token secret holding the Vault token.
pub const DEFAULT_VAULT_TOKEN_KEY: &str = "token";

/// The provider selector as written in configuration: one optional section per
/// backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_manager: Option<CertManagerProviderSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultProviderSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tresor: Option<TresorProviderSpec>,
}

/// Settings for delegating signing to cert-manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerProviderSpec {
    /// Secret holding the root certificate of the issuer
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    pub issuer_name: String,
    #[serde(default)]
    pub issuer_kind: String,
    #[serde(default)]
    pub issuer_group: String,
}

/// Settings for signing through a Vault PKI secrets engine.
///
/// The token is given either inline or, preferably, as a reference to a
/// secret in the control plane namespace. Exactly one of the two is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultProviderSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub role: String,
    /// `http` or `https`
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub token: SecretString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<VaultTokenSecretRef>,
    #[serde(default = "default_vault_port")]
    pub port: u16,
    #[serde(default = "default_vault_mount")]
    pub mount: String,
}

impl Default for VaultProviderSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            role: String::new(),
            protocol: "https".to_string(),
            token: SecretString::default(),
            token_secret_ref: None,
            port: DEFAULT_VAULT_PORT,
            mount: DEFAULT_VAULT_MOUNT.to_string(),
        }
    }
}

impl VaultProviderSpec {
    /// Base address of the Vault API, e.g. `https://vault.internal:8200`.
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Secret entry holding the Vault token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultTokenSecretRef {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_vault_token_key")]
    pub key: String,
}

impl VaultTokenSecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key: DEFAULT_VAULT_TOKEN_KEY.to_string() }
    }
}

fn default_vault_token_key() -> String {
    DEFAULT_VAULT_TOKEN_KEY.to_string()
}

fn default_vault_port() -> u16 {
    DEFAULT_VAULT_PORT
}

fn default_vault_mount() -> String {
    DEFAULT_VAULT_MOUNT.to_string()
}

/// Settings for the built-in signing authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TresorProviderSpec {
    /// Secret holding (or receiving) the generated root certificate and key
    #[serde(default)]
    pub secret_name: String,
}

/// Which backend a provider configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Tresor,
    CertManager,
    Vault,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Tresor => "tresor",
            ProviderKind::CertManager => "cert-manager",
            ProviderKind::Vault => "vault",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated provider configuration with exactly one backend selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Tresor(TresorProviderSpec),
    CertManager(CertManagerProviderSpec),
    Vault(VaultProviderSpec),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Tresor(_) => ProviderKind::Tresor,
            ProviderConfig::CertManager(_) => ProviderKind::CertManager,
            ProviderConfig::Vault(_) => ProviderKind::Vault,
        }
    }
}

impl ProviderSpec {
    /// Check that exactly one provider is populated and that its required
    /// fields are present, returning the selected configuration.
    pub fn resolve(&self) -> Result<ProviderConfig, ConfigError> {
        let mut populated = Vec::new();
        if self.cert_manager.is_some() {
            populated.push("certManager");
        }
        if self.vault.is_some() {
            populated.push("vault");
        }
        if self.tresor.is_some() {
            populated.push("tresor");
        }
        if populated.len() > 1 {
            return Err(ConfigError::MultipleProviders { providers: populated });
        }

        if let Some(spec) = &self.cert_manager {
            let provider = ProviderKind::CertManager.as_str();
            require(provider, "secretName", &spec.secret_name)?;
            require(provider, "issuerName", &spec.issuer_name)?;
            require(provider, "issuerKind", &spec.issuer_kind)?;
            require(provider, "issuerGroup", &spec.issuer_group)?;
            return Ok(ProviderConfig::CertManager(spec.clone()));
        }

        if let Some(spec) = &self.vault {
            let provider = ProviderKind::Vault.as_str();
            require(provider, "host", &spec.host)?;
            require(provider, "role", &spec.role)?;
            require(provider, "protocol", &spec.protocol)?;
            match &spec.token_secret_ref {
                Some(_) if !spec.token.is_empty() => {
                    return Err(ConfigError::invalid(
                        "vault token and tokenSecretRef are mutually exclusive",
                    ));
                }
                Some(reference) => {
                    require(provider, "tokenSecretRef.name", &reference.name)?;
                    require(provider, "tokenSecretRef.key", &reference.key)?;
                }
                None => require(provider, "token", spec.token.expose_secret())?,
            }
            require(provider, "mount", &spec.mount)?;
            if spec.protocol != "http" && spec.protocol != "https" {
                return Err(ConfigError::invalid(format!(
                    "vault protocol must be 'http' or 'https', got '{}'",
                    spec.protocol
                )));
            }
            if spec.port == 0 {
                return Err(ConfigError::invalid("vault port must be non-zero"));
            }
            return Ok(ProviderConfig::Vault(spec.clone()));
        }

        if let Some(spec) = &self.tresor {
            require(ProviderKind::Tresor.as_str(), "secretName", &spec.secret_name)?;
            return Ok(ProviderConfig::Tresor(spec.clone()));
        }

        Err(ConfigError::NoProvider)
    }
}

impl From<ProviderConfig> for ProviderSpec {
    fn from(config: ProviderConfig) -> Self {
        match config {
            ProviderConfig::Tresor(spec) => Self { tresor: Some(spec), ..Default::default() },
            ProviderConfig::CertManager(spec) => {
                Self { cert_manager: Some(spec), ..Default::default() }
            }
            ProviderConfig::Vault(spec) => Self { vault: Some(spec), ..Default::default() },
        }
    }
}

fn require(provider: &'static str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { provider, field });
    }
    Ok(())
}
