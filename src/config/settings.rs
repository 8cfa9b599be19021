//! # Configuration Settings
//!
//! Defines the configuration structure for the meshplane control plane.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::provider::{ProviderConfig, ProviderSpec};
use crate::certificate::RENEW_BEFORE_CERT_EXPIRES;
use crate::errors::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MeshConfig {
    /// Mesh name; namespaces labelled with it are monitored
    #[validate(length(min = 1, message = "Mesh name cannot be empty"))]
    pub mesh_name: String,

    /// Namespace the control plane runs in; provider secrets are read from it
    #[validate(length(min = 1, message = "Control plane namespace cannot be empty"))]
    pub namespace: String,

    /// Certificate provider selection
    #[serde(default)]
    pub provider: ProviderSpec,

    #[validate(nested)]
    #[serde(default)]
    pub certificates: CertificateSettings,

    #[validate(nested)]
    #[serde(default)]
    pub cache: CacheSettings,

    #[validate(nested)]
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mesh_name: "meshplane".to_string(),
            namespace: "meshplane-system".to_string(),
            provider: ProviderSpec::default(),
            certificates: CertificateSettings::default(),
            cache: CacheSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Validate the entire configuration and return the selected provider.
    pub fn validate(&self) -> Result<ProviderConfig, ConfigError> {
        Validate::validate(self)?;
        self.validate_custom()?;
        self.provider.resolve()
    }

    /// Checks the validator derive cannot express.
    fn validate_custom(&self) -> Result<(), ConfigError> {
        // A renewal tick longer than the lead time lets certificates lapse.
        if self.certificates.renewal_interval() > RENEW_BEFORE_CERT_EXPIRES {
            return Err(ConfigError::invalid(format!(
                "certificates.renewal_interval_secs ({}) must not exceed the {}s renewal lead time",
                self.certificates.renewal_interval_secs,
                RENEW_BEFORE_CERT_EXPIRES.as_secs()
            )));
        }

        if self.certificates.validity() <= RENEW_BEFORE_CERT_EXPIRES {
            return Err(ConfigError::invalid(format!(
                "certificates.validity_secs ({}) must exceed the {}s renewal lead time",
                self.certificates.validity_secs,
                RENEW_BEFORE_CERT_EXPIRES.as_secs()
            )));
        }

        Ok(())
    }
}

/// Issued certificate lifetimes and renewal cadence.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertificateSettings {
    /// Validity period of issued leaf certificates in seconds
    #[validate(range(min = 60, message = "Certificate validity must be at least 60 seconds"))]
    pub validity_secs: u64,

    /// Interval between renewal sweeps in seconds
    #[validate(range(min = 1, message = "Renewal interval must be at least 1 second"))]
    pub renewal_interval_secs: u64,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self { validity_secs: 24 * 60 * 60, renewal_interval_secs: 5 }
    }
}

impl CertificateSettings {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.validity_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }
}

/// Resource cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheSettings {
    /// How long startup waits for the initial list of every kind
    #[validate(range(min = 1, max = 600, message = "Sync timeout must be between 1 and 600 seconds"))]
    pub sync_timeout_secs: u64,

    /// Per-subscriber announcement buffer
    #[validate(range(min = 1, max = 65536, message = "Announcement buffer must be between 1 and 65536"))]
    pub announcement_buffer: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { sync_timeout_secs: 60, announcement_buffer: 128 }
    }
}

impl CacheSettings {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` directive). `RUST_LOG` takes precedence when set.
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Address for the Prometheus scrape endpoint; metrics stay in-process when unset
    #[serde(default)]
    pub metrics_bind_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "meshplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            metrics_bind_address: None,
        }
    }
}
