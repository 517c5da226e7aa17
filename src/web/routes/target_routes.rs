use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use crate::monitor::models::{HistoryEntry, NewTarget, TargetPatch};
use crate::web::models::{CreateTargetRequest, TargetView};
use crate::web::{AppError, AppState};

pub fn create_target_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_targets).post(create_target))
        .route(
            "/{id}",
            get(get_target).put(update_target).delete(delete_target),
        )
        .route("/{id}/history", get(get_target_history))
}

#[axum::debug_handler]
async fn list_targets(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<TargetView>>, AppError> {
    let scheduler = app_state.monitor.scheduler();
    let targets = app_state.monitor.store().get_all().await?;
    Ok(Json(
        targets
            .into_iter()
            .map(|t| TargetView::new(t, scheduler))
            .collect(),
    ))
}

#[axum::debug_handler]
async fn create_target(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateTargetRequest>,
) -> Result<(StatusCode, Json<TargetView>), AppError> {
    let created = app_state
        .monitor
        .store()
        .create(NewTarget::from(payload))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(TargetView::new(created, app_state.monitor.scheduler())),
    ))
}

#[axum::debug_handler]
async fn get_target(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<TargetView>, AppError> {
    let target = app_state.monitor.store().get_by_id(id).await?;
    Ok(Json(TargetView::new(target, app_state.monitor.scheduler())))
}

#[axum::debug_handler]
async fn update_target(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<TargetPatch>,
) -> Result<Json<TargetView>, AppError> {
    let updated = app_state.monitor.store().update(id, payload).await?;
    Ok(Json(TargetView::new(updated, app_state.monitor.scheduler())))
}

#[axum::debug_handler]
async fn delete_target(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    app_state.monitor.store().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn get_target_history(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    // Distinguish an unknown target from an empty history.
    app_state.monitor.store().get_by_id(id).await?;
    let history = app_state.monitor.store().get_history(id).await?;
    Ok(Json(history))
}
