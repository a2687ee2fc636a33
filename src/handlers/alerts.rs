//! Alert endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::alerting::Alert;
use crate::error::AppError;
use crate::handlers::AppState;
use crate::service::AlertsReport;

/// GET /alerts: active alerts, recent history and statistics
pub async fn handler(State(state): State<AppState>) -> Json<AlertsReport> {
    Json(state.service().get_alerts().await)
}

/// POST /alerts/{id}/resolve
///
/// Returns 404 when no active alert has this id.
pub async fn resolve_handler(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Alert>, AppError> {
    let alert = state.service().resolve_alert(&alert_id).await?;
    tracing::info!(alert_id = %alert.id, rule_id = %alert.rule_id, "Alert resolved via API");
    Ok(Json(alert))
}
