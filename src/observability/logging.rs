//! # Structured Logging
//!
//! Subscriber installation and span macros for the control plane's long-running
//! operations.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{MeshConfig, ObservabilityConfig};
use crate::errors::ConfigError;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set. Output is JSON
/// when `json_logging` is enabled and human-readable otherwise.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), ConfigError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            ConfigError::invalid(format!("Invalid log level '{}': {}", config.log_level, e))
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_logging {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| ConfigError::invalid(format!("Failed to install subscriber: {}", e)))
}

/// Create a tracing span for a certificate issuance.
///
/// ```rust,ignore
/// let span = issuance_span!("vault", "bookstore.default.svc");
/// ```
#[macro_export]
macro_rules! issuance_span {
    ($provider:expr, $common_name:expr) => {
        tracing::info_span!(
            "certificate_issuance",
            provider = %$provider,
            common_name = %$common_name,
            request_id = %uuid::Uuid::new_v4()
        )
    };
    ($provider:expr, $common_name:expr, $($field:tt)*) => {
        tracing::info_span!(
            "certificate_issuance",
            provider = %$provider,
            common_name = %$common_name,
            request_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one reconcile pass over a root certificate object.
#[macro_export]
macro_rules! reconcile_span {
    ($name:expr) => {
        tracing::info_span!(
            "root_reconcile",
            name = %$name,
            reconcile_id = %uuid::Uuid::new_v4()
        )
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!(
            "root_reconcile",
            name = %$name,
            reconcile_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &MeshConfig) {
    tracing::info!(
        mesh_name = %config.mesh_name,
        namespace = %config.namespace,
        certificate_validity_secs = config.certificates.validity_secs,
        renewal_interval_secs = config.certificates.renewal_interval_secs,
        cache_sync_timeout_secs = config.cache.sync_timeout_secs,
        json_logging = config.observability.json_logging,
        metrics_enabled = config.observability.metrics_bind_address.is_some(),
        "meshplane configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = issuance_span!("tresor", "bookstore.default.svc");
        let _span = issuance_span!("vault", "bookstore.default.svc", validity_secs = 3600);
        let _span = reconcile_span!("mesh-root");
        let _span = reconcile_span!("mesh-root", state = "init");
    }

    #[test]
    fn test_log_config_info() {
        // This should not panic
        log_config_info(&MeshConfig::default());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        // Only meaningful when RUST_LOG does not override the configured level.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = ObservabilityConfig {
            log_level: "meshplane=loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(init_logging(&config), Err(ConfigError::Invalid { .. })));
    }
}
