//! Health check endpoints for monitoring and diagnostics

use crate::state::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Timestamp of the check
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Dispatcher queue statistics
    pub queue: QueueStats,
    /// Number of known jobs per state
    pub jobs: BTreeMap<String, usize>,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
}

/// Dispatcher queue statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for a dispatcher worker
    pub depth: usize,
    /// Queue capacity
    pub capacity: usize,
    /// Dispatcher worker count
    pub workers: usize,
}

/// Basic health check endpoint for monitoring systems
///
/// # Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "timestamp": "2025-03-15T14:25:30Z",
///   "queue": { "depth": 0, "capacity": 256, "workers": 4 },
///   "jobs": { "chunk_processing": 1, "done": 12 },
///   "uptime_seconds": 3600
/// }
/// ```
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatch = &state.config().dispatch;
    let queue = QueueStats {
        depth: state.orchestrator.queue_depth(),
        capacity: dispatch.queue_size.max(1),
        workers: dispatch.workers.max(1),
    };
    let jobs = state.orchestrator.store().counts_by_state();
    debug!("Health check: queue depth {}, {} job state(s)", queue.depth, jobs.len());

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        queue,
        jobs,
        uptime_seconds: state.uptime_seconds(),
    })
}
