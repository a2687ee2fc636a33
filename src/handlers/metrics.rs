//! Metrics endpoints
//!
//! `/metrics` exposes the Prometheus registry in text format for scraping.
//! `/metrics/series` summarizes the in-memory time series.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::handlers::AppState;
use crate::service::MetricsReport;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics collection fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP tiergate_requests_total Total number of routed requests by wrapper and outcome
/// # TYPE tiergate_requests_total counter
/// tiergate_requests_total{outcome="success",wrapper="primary"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    let metrics = state.metrics();
    match metrics.gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to gather metrics for Prometheus scraping. \
                This indicates a metrics encoding issue (invalid UTF-8, \
                corrupted labels, or encoder failure)."
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    pub name: Option<String>,
    pub window_ms: Option<u64>,
}

/// GET /metrics/series?name=&window_ms=
pub async fn series_handler(
    State(state): State<AppState>,
    Query(query): Query<SeriesQuery>,
) -> Json<MetricsReport> {
    Json(
        state
            .service()
            .get_metrics(query.name.as_deref(), query.window_ms)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::OrchestrationService;
    use crate::wrapper::WrapperDeps;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let service = OrchestrationService::new(Config::default(), WrapperDeps::default())
            .expect("should create service");
        let state = AppState::new(Arc::new(service));
        state
            .metrics()
            .record_request("primary", crate::metrics::Outcome::Success)
            .expect("Test operation should succeed");

        let (status, body) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# TYPE tiergate_requests_total counter"));
    }
}
