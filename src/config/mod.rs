//! # Configuration Management
//!
//! Process configuration is layered: built-in defaults, then an optional YAML
//! file, then `MESHPLANE__`-prefixed environment variables (`__` separates
//! nesting levels, e.g. `MESHPLANE__CACHE__SYNC_TIMEOUT_SECS=30`).

pub mod provider;
pub mod settings;

use std::path::Path;

pub use provider::{
    CertManagerProviderSpec, ProviderConfig, ProviderKind, ProviderSpec, TresorProviderSpec,
    VaultProviderSpec, VaultTokenSecretRef, DEFAULT_VAULT_MOUNT, DEFAULT_VAULT_PORT,
    DEFAULT_VAULT_TOKEN_KEY,
};
pub use settings::{CacheSettings, CertificateSettings, MeshConfig, ObservabilityConfig};

use crate::errors::ConfigError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MESHPLANE";

impl MeshConfig {
    /// Load configuration from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let environment = ::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true);
        Self::load_with_env(path, environment)
    }

    fn load_with_env(
        path: Option<&Path>,
        environment: ::config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&MeshConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml).required(true),
            );
        }

        builder = builder.add_source(environment.prefix_separator("__").separator("__"));

        let config: MeshConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load, validate, and log the effective configuration.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ProviderConfig), ConfigError> {
        let config = Self::load(path)?;
        let provider = config.validate().inspect_err(|e| {
            crate::observability::errcode::log_error(
                crate::observability::ErrorCode::InvalidProviderConfig,
                e,
                "Invalid mesh configuration",
            );
        })?;

        tracing::info!(
            mesh_name = %config.mesh_name,
            namespace = %config.namespace,
            provider = %provider.kind(),
            validity_secs = config.certificates.validity_secs,
            renewal_interval_secs = config.certificates.renewal_interval_secs,
            "Loaded mesh configuration"
        );

        Ok((config, provider))
    }
}
