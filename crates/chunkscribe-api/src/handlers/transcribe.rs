//! Upload handler accepting audio files and live captures

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Multipart, State},
    response::Json,
};
use chunkscribe_transcriber::JobId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Response for an accepted upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscribeResponse {
    /// Id to poll `/status/{job_id}` with
    pub job_id: JobId,
    /// Probed duration in minutes, 0 for live captures
    pub estimated_duration_minutes: f64,
}

/// Parts of the multipart form we care about
#[derive(Debug, Default)]
struct TranscribeForm {
    file_name: Option<String>,
    data: Option<Vec<u8>>,
    mic_mode: bool,
}

async fn read_form(multipart: &mut Multipart) -> ApiResult<TranscribeForm> {
    let mut form = TranscribeForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                form.file_name = field.file_name().map(String::from);
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read uploaded file: {e}"))
                })?;
                form.data = Some(bytes.to_vec());
            }
            "mic_mode" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Invalid mic_mode field: {e}"))
                })?;
                form.mic_mode = value == "true";
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Lower-cased extension with its leading dot, e.g. `.mp3`
fn dotted_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Accept an upload and queue it for transcription
///
/// Form fields: `file` (the audio) and `mic_mode` (`"true"` for a live
/// capture). Uploaded files are probed before a job is created; a file whose
/// duration cannot be determined or exceeds the ceiling is rejected with 400.
///
/// # Errors
///
/// * `BAD_REQUEST` - missing file, unsupported extension, unusable duration
/// * `SERVICE_UNAVAILABLE` - the server is shutting down
/// * `INTERNAL_SERVER_ERROR` - the upload could not be saved
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<TranscribeResponse>> {
    let form = read_form(&mut multipart).await?;
    let Some(data) = form.data else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let job_id = JobId::new();

    if form.mic_mode {
        let path = state.upload_dir.join(format!("{job_id}_temp_mic.webm"));
        tokio::fs::write(&path, &data).await?;
        info!("Saved live capture for job {job_id} to {}", path.display());

        let ticket = state.orchestrator.submit_capture(job_id, path).await?;
        return Ok(Json(TranscribeResponse {
            job_id: ticket.job_id,
            estimated_duration_minutes: ticket.estimated_duration_minutes(),
        }));
    }

    let ext = dotted_extension(form.file_name.as_deref().unwrap_or_default());
    let allowed = &state.config().storage.allowed_extensions;
    if !allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(&ext)) {
        return Err(ApiError::bad_request(format!(
            "Unsupported file type: {ext}. Supported types are: {}",
            allowed.join(", ")
        )));
    }

    let path = state.upload_dir.join(format!("{job_id}_original{ext}"));
    if let Err(e) = tokio::fs::write(&path, &data).await {
        error!("Failed to save upload for job {job_id}: {e}");
        return Err(e.into());
    }
    info!(
        "Saved upload for job {job_id} to {} ({} bytes)",
        path.display(),
        data.len()
    );

    let ticket = state.orchestrator.submit_file(job_id, path).await?;
    Ok(Json(TranscribeResponse {
        job_id: ticket.job_id,
        estimated_duration_minutes: ticket.estimated_duration_minutes(),
    }))
}
