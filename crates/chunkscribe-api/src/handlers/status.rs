//! Job status and latest transcript endpoints

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
};
use chunkscribe_transcriber::{JobId, JobStatusView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Most recently completed transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestTranscriptResponse {
    /// Transcript text
    pub transcript: String,
}

/// Aggregated status of one job
///
/// Ids that are not UUIDs are reported exactly like unknown ones.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::not_found("Invalid job ID"))?;

    let view = state.orchestrator.status(job_id).await?;
    Ok(Json(view))
}

/// Transcript of the most recently completed job
pub async fn latest_transcript(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<LatestTranscriptResponse>> {
    state
        .orchestrator
        .latest_transcript()
        .map(|transcript| Json(LatestTranscriptResponse { transcript }))
        .ok_or_else(|| {
            ApiError::not_found("No latest transcript available. Upload an audio file first.")
        })
}
