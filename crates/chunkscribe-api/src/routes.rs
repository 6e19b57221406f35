//! API route definitions

use crate::{handlers, state::AppState};
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

/// Job submission and polling routes
pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/transcribe", post(handlers::transcribe::transcribe))
        .route("/status/:job_id", get(handlers::status::job_status))
        .route(
            "/latest_transcript",
            get(handlers::status::latest_transcript),
        )
}

/// Health check routes
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(handlers::health::health_check))
}

/// Combine all routes into a single router
pub fn build_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(job_routes())
        .merge(health_routes())
        .fallback(not_found_handler)
}

/// Handle 404 Not Found errors
async fn not_found_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "The requested endpoint does not exist"
        })),
    )
}
