//! Error types for the transcription orchestrator

use crate::types::JobId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for transcription operations
pub type TranscriptionResult<T> = Result<T, TranscriptionError>;

/// Errors that can occur while accepting or running transcription jobs
#[derive(Error, Debug)]
pub enum TranscriptionError {
    /// Audio rejected before a job was created
    #[error("Unusable input {path}: {reason}")]
    UnusableInput {
        /// Offending file
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Transcoding or cutting failed
    #[error("Audio conversion failed: {message}")]
    TranscodeFailure {
        /// Error message
        message: String,
    },

    /// Blob upload failed
    #[error("Upload of {name} failed: {message}")]
    UploadFailure {
        /// Remote blob name
        name: String,
        /// Error message
        message: String,
    },

    /// Provider rejected the request or reported a failed operation
    #[error("Transcription provider error: {message}")]
    ProviderFailure {
        /// Error message
        message: String,
    },

    /// Provider operation did not finish within the wait timeout
    #[error("Transcription operation timed out after {seconds} seconds")]
    ProviderTimeout {
        /// Timeout duration
        seconds: u64,
    },

    /// Some chunks of a chunked job failed
    #[error("{failed} chunk(s) failed. Details: {details}")]
    PartialChunkFailure {
        /// Number of failed chunks
        failed: usize,
        /// Per-chunk error descriptions
        details: String,
    },

    /// No job with this id
    #[error("Job not found: {job_id}")]
    JobNotFound {
        /// Requested id
        job_id: JobId,
    },

    /// A job id was registered twice
    #[error("Job already exists: {job_id}")]
    DuplicateJob {
        /// Conflicting id
        job_id: JobId,
    },

    /// The dispatcher is shut down
    #[error("Job queue is closed")]
    QueueClosed,

    /// Every dispatcher queue slot is taken
    #[error("Job queue is full ({capacity} waiting), try again later")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// A worker task ended without producing an outcome
    #[error("Worker task failed: {message}")]
    WorkerFailed {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure classes exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected synchronously, no job created
    UnusableInput,
    /// Transcoding or cutting failed
    TranscodeFailure,
    /// Upload failed
    UploadFailure,
    /// Provider failed or timed out
    ProviderFailure,
    /// Some but not necessarily all chunks failed
    PartialChunkFailure,
    /// Lookup, lifecycle or environment problem outside the worker taxonomy
    Other,
}

impl TranscriptionError {
    /// Create an unusable input error
    pub fn unusable_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnusableInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a transcode failure
    pub fn transcode_failure(message: impl Into<String>) -> Self {
        Self::TranscodeFailure {
            message: message.into(),
        }
    }

    /// Create an upload failure
    pub fn upload_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UploadFailure {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a provider failure
    pub fn provider_failure(message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            message: message.into(),
        }
    }

    /// Create a provider timeout error
    pub const fn provider_timeout(seconds: u64) -> Self {
        Self::ProviderTimeout { seconds }
    }

    /// Create a job not found error
    pub const fn job_not_found(job_id: JobId) -> Self {
        Self::JobNotFound { job_id }
    }

    /// Create a worker failure
    pub fn worker_failed(message: impl Into<String>) -> Self {
        Self::WorkerFailed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify the error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnusableInput { .. } => ErrorKind::UnusableInput,
            Self::TranscodeFailure { .. } => ErrorKind::TranscodeFailure,
            Self::UploadFailure { .. } => ErrorKind::UploadFailure,
            Self::ProviderFailure { .. } | Self::ProviderTimeout { .. } => {
                ErrorKind::ProviderFailure
            }
            Self::PartialChunkFailure { .. } => ErrorKind::PartialChunkFailure,
            Self::JobNotFound { .. }
            | Self::DuplicateJob { .. }
            | Self::QueueClosed
            | Self::QueueFull { .. }
            | Self::WorkerFailed { .. }
            | Self::Configuration { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Http(_) => ErrorKind::Other,
        }
    }

    /// Whether the error may be retried
    ///
    /// Nothing is retried: a failed job or chunk stays failed.
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

impl From<chunkscribe_core::Error> for TranscriptionError {
    fn from(err: chunkscribe_core::Error) -> Self {
        Self::configuration(err.to_string())
    }
}
