//! Health check endpoint
//!
//! Reports the last published health snapshot for monitoring and load
//! balancers.

use axum::{Json, extract::State, http::StatusCode};

use crate::handlers::AppState;
use crate::service::{HealthReport, ServiceHealth};

/// Health check handler
///
/// Returns 200 OK while the system is healthy or degraded, and 503 Service
/// Unavailable when it is unhealthy or no health cycle has completed yet.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service().get_health_status().await;
    let status = match report.status {
        ServiceHealth::Healthy | ServiceHealth::Degraded => StatusCode::OK,
        ServiceHealth::Unhealthy | ServiceHealth::Unknown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::OrchestrationService;
    use crate::wrapper::WrapperDeps;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        let mut config = Config::default();
        config.health.interval_seconds = 0;
        let service = OrchestrationService::new(config, WrapperDeps::default())
            .expect("should create service");
        AppState::new(Arc::new(service))
    }

    #[tokio::test]
    async fn test_health_handler_unknown_before_first_cycle() {
        let state = create_test_state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, ServiceHealth::Unknown);
    }

    #[tokio::test]
    async fn test_health_handler_degraded_with_no_components() {
        let state = create_test_state();
        state.service().initialize().await.expect("initialize");
        state.service().health_checker().check_all().await;

        // No components at all reports degraded, which still serves traffic
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, ServiceHealth::Degraded);
    }
}
