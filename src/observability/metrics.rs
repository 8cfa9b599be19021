//! # Metrics Collection
//!
//! Recording goes through the `metrics` facade. An exporter is only installed
//! when a scrape address is configured; otherwise the calls are no-ops.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::errors::ConfigError;

/// Metrics recorder for certificate and cache activity
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record a certificate issued by a provider
    pub fn record_certificate_issued(&self, provider: &'static str) {
        counter!("meshplane_certificates_issued_total", "provider" => provider).increment(1);
    }

    /// Record the outcome of renewing a cached certificate
    pub fn record_certificate_rotation(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("meshplane_certificates_rotated_total", "status" => status).increment(1);
    }

    /// Update the number of certificates held by the manager
    pub fn set_cached_certificates(&self, count: usize) {
        gauge!("meshplane_certificates_cached").set(count as f64);
    }

    /// Record an announcement published on a kind's bus
    pub fn record_announcement(&self, kind: &'static str) {
        counter!("meshplane_announcements_total", "kind" => kind).increment(1);
    }

    /// Record a root certificate status transition
    pub fn record_root_transition(&self, from: &str, to: &str) {
        let labels = [("from", from.to_string()), ("to", to.to_string())];
        counter!("meshplane_root_transitions_total", &labels).increment(1);
    }

    /// Register metric descriptions
    pub fn register_metrics(&self) {
        describe_counter!(
            "meshplane_certificates_issued_total",
            Unit::Count,
            "Certificates issued by each provider"
        );
        describe_counter!(
            "meshplane_certificates_rotated_total",
            Unit::Count,
            "Renewals of cached certificates by outcome"
        );
        describe_gauge!(
            "meshplane_certificates_cached",
            Unit::Count,
            "Certificates currently tracked for renewal"
        );
        describe_counter!(
            "meshplane_announcements_total",
            Unit::Count,
            "Announcements published per resource kind"
        );
        describe_counter!(
            "meshplane_root_transitions_total",
            Unit::Count,
            "Root certificate rotation state transitions"
        );
        describe_counter!("meshplane_errors_total", Unit::Count, "Logged errors by error code");
    }
}

/// Initialize the Prometheus exporter if a bind address is configured.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<(), ConfigError> {
    let Some(metrics_addr) = config.metrics_bind_address.as_deref() else {
        return Ok(());
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        ConfigError::invalid(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            ConfigError::invalid(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    MetricsRecorder::new().register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}
