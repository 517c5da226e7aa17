//! JSON control API served by the daemon.

use axum::{Router, http::Method};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::monitor::Monitor;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

use routes::{control_routes, target_routes};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

pub fn create_axum_router(monitor: Arc<Monitor>) -> Router {
    let app_state = Arc::new(AppState { monitor });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .nest("/api/targets", target_routes::create_target_router())
        .merge(control_routes::create_control_router())
        .with_state(app_state)
        .layer(cors)
}
