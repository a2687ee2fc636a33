//! HTTP request handlers for the Tiergate operator API

use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::service::OrchestrationService;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod alerts;
pub mod completions;
pub mod health;
pub mod metrics;
pub mod status;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<OrchestrationService>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(service: Arc<OrchestrationService>) -> Self {
        let metrics = Arc::clone(service.prometheus());
        Self { service, metrics }
    }

    /// Get reference to the orchestration service
    pub fn service(&self) -> &OrchestrationService {
        &self.service
    }

    /// Get reference to the Prometheus registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build the full router with tracing and request ids
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/status", get(status::handler))
        .route("/metrics", get(metrics::handler))
        .route("/metrics/series", get(metrics::series_handler))
        .route("/alerts", get(alerts::handler))
        .route("/alerts/{id}/resolve", post(alerts::resolve_handler))
        .route("/v1/completions", post(completions::handler))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
