use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use crate::alerting::{AckOutcome, AlertState};
use crate::monitor::CheckNowSummary;
use crate::version::VERSION;
use crate::web::models::{AckRequest, HealthResponse};
use crate::web::{AppError, AppState};

pub fn create_control_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/check-now", post(check_now))
        .route("/api/alert", get(get_alert))
        .route("/api/alert/ack", post(acknowledge_alert))
        .route("/api/alert/test", post(test_alert))
        .route("/api/health", get(health))
}

#[axum::debug_handler]
async fn check_now(
    State(app_state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<CheckNowSummary>), AppError> {
    let summary = app_state.monitor.check_now().await?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

#[axum::debug_handler]
async fn get_alert(State(app_state): State<Arc<AppState>>) -> Json<AlertState> {
    Json(app_state.monitor.alerts().state().await)
}

#[axum::debug_handler]
async fn acknowledge_alert(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<AckRequest>,
) -> Json<AckOutcome> {
    Json(app_state.monitor.alerts().acknowledge(payload.kind).await)
}

#[axum::debug_handler]
async fn test_alert(State(app_state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    app_state.monitor.alerts().test_alert().await?;
    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn health(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        pending_checks: app_state.monitor.scheduler().pending_count(),
    })
}
