//! Service status endpoint

use axum::{Json, extract::State};

use crate::handlers::AppState;
use crate::service::ServiceStatus;

/// GET /status: initialization, health, wrappers, metrics and alerts in one
/// document
pub async fn handler(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service().get_service_status().await)
}
