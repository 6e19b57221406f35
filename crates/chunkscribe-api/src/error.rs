//! HTTP error responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chunkscribe_transcriber::TranscriptionError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Human readable error
    pub error: String,
}

/// Errors returned by the handlers
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or unacceptable request (400)
    BadRequest(String),
    /// Unknown resource (404)
    NotFound(String),
    /// Service is shutting down (503)
    Unavailable(String),
    /// Anything else (500)
    Internal(String),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_message(self) -> String {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Unavailable(m) | Self::Internal(m) => m,
        }
    }
}

impl From<TranscriptionError> for ApiError {
    fn from(err: TranscriptionError) -> Self {
        match err {
            TranscriptionError::UnusableInput { reason, .. } => Self::BadRequest(reason),
            TranscriptionError::JobNotFound { .. } => Self::not_found("Invalid job ID"),
            TranscriptionError::QueueClosed | TranscriptionError::QueueFull { .. } => {
                Self::Unavailable(err.to_string())
            }
            other => {
                error!("Request failed: {other}");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        error!("I/O failure while handling request: {err}");
        Self::Internal(format!("I/O error: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.into_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chunkscribe_transcriber::JobId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transcription_errors_map_to_status_codes() {
        let cases = [
            (
                TranscriptionError::unusable_input("/tmp/a.mp3", "zero duration"),
                StatusCode::BAD_REQUEST,
            ),
            (
                TranscriptionError::job_not_found(JobId::new()),
                StatusCode::NOT_FOUND,
            ),
            (TranscriptionError::QueueClosed, StatusCode::SERVICE_UNAVAILABLE),
            (
                TranscriptionError::QueueFull { capacity: 256 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TranscriptionError::provider_failure("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_unknown_job_message() {
        let err = ApiError::from(TranscriptionError::job_not_found(JobId::new()));
        assert_eq!(err.into_message(), "Invalid job ID");
    }
}
