//! # Observability Infrastructure
//!
//! Structured logging, stable error codes, and metrics for the control plane.

pub mod errcode;
pub mod logging;
pub mod metrics;

pub use errcode::{log_error, ErrorCode};
pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::ConfigError;

/// Initialize logging and, when configured, the metrics exporter.
///
/// Must be called from within a Tokio runtime when a metrics address is set.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), ConfigError> {
    init_logging(config)?;
    init_metrics(config)?;

    ::tracing::info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        "Observability initialized"
    );

    Ok(())
}
