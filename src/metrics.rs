//! Prometheus metrics export for Tiergate
//!
//! This module mirrors request outcomes, alerts and component health into a
//! Prometheus registry for scraping:
//! - Request counts by wrapper and outcome
//! - Request latency by wrapper
//! - Alerts fired by level
//! - Last published health per component
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! The in-memory time series used by the orchestration API live in
//! [`crate::collector`]; this registry is only the scrape surface.

use crate::alerting::AlertLevel;
use crate::health::{ComponentKind, HealthStatus};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Request outcome enum for type-safe metrics labels
///
/// Keeps the `outcome` label to a fixed set of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    /// A stream was opened; its completion is not tracked here
    StreamOpened,
}

impl Outcome {
    /// Convert outcome to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::StreamOpened => "stream_opened",
        }
    }
}

/// Metrics registry for Tiergate
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: CounterVec,
    request_duration: HistogramVec,
    alerts_total: IntCounterVec,
    component_health: IntGaugeVec,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: wrappers come from configuration, outcomes are fixed
        let requests_total = CounterVec::new(
            Opts::new(
                "tiergate_requests_total",
                "Total number of routed requests by wrapper and outcome",
            ),
            &["wrapper", "outcome"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "tiergate_request_duration_ms",
                "End-to-end request latency in milliseconds by wrapper",
            )
            .buckets(vec![
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["wrapper"],
        )?;

        let alerts_total = IntCounterVec::new(
            Opts::new("tiergate_alerts_total", "Total number of alerts fired by level"),
            &["level"],
        )?;

        // 0 healthy, 1 degraded, 2 unhealthy
        let component_health = IntGaugeVec::new(
            Opts::new(
                "tiergate_component_health",
                "Last published component health (0 healthy, 1 degraded, 2 unhealthy)",
            ),
            &["component", "kind"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "tiergate_metrics_recording_failures_total",
                "Total number of metrics recording operation failures by operation. \
                Indicates Prometheus internal errors or rejected observations.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(component_health.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_duration,
            alerts_total,
            component_health,
            metrics_recording_failures,
        })
    }

    /// Record a routed request
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_request(&self, wrapper: &str, outcome: Outcome) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[wrapper, outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record request latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative. Such
    /// values corrupt histogram percentiles, so they are rejected rather than
    /// observed.
    pub fn record_request_duration(
        &self,
        wrapper: &str,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative (duration cannot be negative), got: {}",
                duration_ms
            )));
        }

        self.request_duration
            .get_metric_with_label_values(&[wrapper])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_alert(&self, level: AlertLevel) {
        self.alerts_total.with_label_values(&[level.as_str()]).inc();
    }

    /// Set the health gauge of one component
    pub fn set_component_health(&self, component: &str, kind: ComponentKind, status: HealthStatus) {
        self.component_health
            .with_label_values(&[component, kind.as_str()])
            .set(status.gauge_value());
    }

    /// Drop the health gauge of a component that no longer exists
    pub fn remove_component_health(&self, component: &str, kind: ComponentKind) {
        // Absent label sets are not an error worth surfacing
        let _ = self
            .component_health
            .remove_label_values(&[component, kind.as_str()]);
    }

    /// Record a metrics recording operation failure
    ///
    /// Recording failures never fail the request that produced them; they
    /// are counted here and logged by the caller.
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total metrics recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        let metric_families = self.registry.gather();
        metric_families
            .iter()
            .find(|mf| mf.name() == "tiergate_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            let metric_names: Vec<_> = metric_families.iter().map(|mf| mf.name()).collect();

            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                metric_names = ?metric_names,
                "Prometheus text encoder failed"
            );

            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to,
                e.utf8_error()
            ))
        })
    }
}
