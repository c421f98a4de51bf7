//! Prometheus metrics for requests, reconciliation and access decisions.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatehouse_core::telemetry::metrics::{RequestDurationHistogram, RbacMetrics};
//!
//! RequestDurationHistogram::record("GET", "/api/v1/actions", 200, 0.004);
//! RbacMetrics::record_access_decision("authorized");
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

pub const ERRORS_TOTAL: &str = "gatehouse_errors_total";
pub const ACTIONS_ADDED_TOTAL: &str = "gatehouse_actions_added_total";
pub const ACTIONS_REMOVED_TOTAL: &str = "gatehouse_actions_removed_total";
pub const GRANTS_ADDED_TOTAL: &str = "gatehouse_grants_added_total";
pub const GRANTS_REMOVED_TOTAL: &str = "gatehouse_grants_removed_total";
pub const SUPERUSER_ROLES_TOTAL: &str = "gatehouse_superuser_roles_total";
pub const ACCESS_DECISIONS_TOTAL: &str = "gatehouse_access_decisions_total";
pub const HTTP_REQUEST_DURATION: &str = "gatehouse_http_request_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "gatehouse_http_requests_total";

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for request durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
}

/// Handle onto the installed Prometheus recorder.
///
/// Disabled registries render an empty body.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if the bucket layout is invalid or a recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_histogram!(HTTP_REQUEST_DURATION, "HTTP request duration in seconds");
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");

    describe_counter!(ERRORS_TOTAL, "Total number of errors by code");

    describe_counter!(ACTIONS_ADDED_TOTAL, "Actions inserted by reconciliation");
    describe_counter!(ACTIONS_REMOVED_TOTAL, "Actions retired by reconciliation");
    describe_counter!(GRANTS_ADDED_TOTAL, "Role action grants created");
    describe_counter!(GRANTS_REMOVED_TOTAL, "Role action grants removed");
    describe_counter!(SUPERUSER_ROLES_TOTAL, "Superuser roles provisioned");
    describe_counter!(
        ACCESS_DECISIONS_TOTAL,
        "Permission check outcomes by decision"
    );
}

/// Request duration histogram for HTTP requests.
pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    pub fn record(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
        histogram!(
            HTTP_REQUEST_DURATION,
            "method" => method.to_string(),
            "path" => path.to_string(),
        )
        .record(duration_seconds);

        counter!(
            HTTP_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }

    /// Start timing a request.
    pub fn start(method: &str, path: &str) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

/// Timer for measuring request durations.
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    /// Finish timing and record the duration.
    pub fn finish(self, status_code: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        RequestDurationHistogram::record(&self.method, &self.path, status_code, duration);
    }
}

/// Counters for the RBAC subsystem.
pub struct RbacMetrics;

impl RbacMetrics {
    pub fn record_action_added(grants: u64) {
        counter!(ACTIONS_ADDED_TOTAL).increment(1);
        counter!(GRANTS_ADDED_TOTAL, "source" => "reconcile").increment(grants);
    }

    pub fn record_action_removed(grants: u64) {
        counter!(ACTIONS_REMOVED_TOTAL).increment(1);
        counter!(GRANTS_REMOVED_TOTAL, "source" => "reconcile").increment(grants);
    }

    pub fn record_superuser_role(grants: u64) {
        counter!(SUPERUSER_ROLES_TOTAL).increment(1);
        counter!(GRANTS_ADDED_TOTAL, "source" => "provision").increment(grants);
    }

    /// Administrator grant edits through the API.
    pub fn record_grant_change(added: bool) {
        if added {
            counter!(GRANTS_ADDED_TOTAL, "source" => "api").increment(1);
        } else {
            counter!(GRANTS_REMOVED_TOTAL, "source" => "api").increment(1);
        }
    }

    pub fn record_access_decision(outcome: &'static str) {
        counter!(ACCESS_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let registry = MetricsRegistry::disabled();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let timer = RequestDurationHistogram::start("GET", "/health");
        timer.finish(200);
        RbacMetrics::record_action_added(3);
        RbacMetrics::record_access_decision("forbidden");
    }
}
