//! HTTP API for the chunkscribe transcription orchestrator
//!
//! Endpoints:
//! - `POST /transcribe` accepts a multipart upload or live capture
//! - `GET /status/:job_id` returns the aggregated job view
//! - `GET /latest_transcript` returns the most recently completed transcript
//! - `GET /health` reports queue depth and job counts

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::{AppState, build_collaborators};

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_app(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.config().server.max_upload_bytes;

    routes::build_router()
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
