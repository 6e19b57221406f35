//! Core types for jobs, chunks and recognition requests

use chrono::{DateTime, Utc};
use chunkscribe_core::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Processing path of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Whole asset transcribed by one worker
    Single,
    /// Asset split into time windows, one worker per window
    Chunked,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Chunked => write!(f, "chunked"),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, not yet picked up by a dispatcher worker
    Created,
    /// Cutting the asset into chunk files
    Splitting,
    /// Chunk workers running
    ChunkProcessing,
    /// Transcoding an uploaded file
    Converting,
    /// Transcoding a live capture
    ConvertingCapture,
    /// Uploading the transcoded asset
    Uploading,
    /// Waiting on the provider operation
    Transcribing,
    /// Finished with a transcript
    Done,
    /// Finished with an error
    Error,
}

impl JobState {
    /// Whether the state is final
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Splitting | Self::Converting | Self::ConvertingCapture => 1,
            Self::ChunkProcessing | Self::Uploading => 2,
            Self::Transcribing => 3,
            Self::Done | Self::Error => 4,
        }
    }

    const fn allowed_for(self, kind: JobKind) -> bool {
        match self {
            Self::Splitting | Self::ChunkProcessing => matches!(kind, JobKind::Chunked),
            Self::Converting | Self::ConvertingCapture | Self::Uploading | Self::Transcribing => {
                matches!(kind, JobKind::Single)
            }
            Self::Created | Self::Done | Self::Error => true,
        }
    }

    /// Whether a job of `kind` may move from `self` to `next`
    ///
    /// Transitions only move forward and never leave a terminal state.
    pub const fn can_advance_to(self, next: Self, kind: JobKind) -> bool {
        !self.is_terminal() && next.rank() > self.rank() && next.allowed_for(kind)
    }

    /// Fixed progress reported for a single job in this state
    pub const fn single_progress(self) -> f64 {
        match self {
            Self::ConvertingCapture => 10.0,
            Self::Converting => 25.0,
            Self::Uploading => 50.0,
            Self::Transcribing => 75.0,
            Self::Done => 100.0,
            Self::Created | Self::Splitting | Self::ChunkProcessing | Self::Error => 0.0,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Splitting => "splitting",
            Self::ChunkProcessing => "chunk_processing",
            Self::Converting => "converting",
            Self::ConvertingCapture => "converting_capture",
            Self::Uploading => "uploading",
            Self::Transcribing => "transcribing",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Cut, waiting for a worker slot
    #[serde(rename = "pending")]
    Pending,
    /// Uploading the chunk file
    #[serde(rename = "uploading_chunk")]
    UploadingChunk,
    /// Waiting on the provider operation
    #[serde(rename = "transcribing_chunk")]
    TranscribingChunk,
    /// Finished with a transcript
    #[serde(rename = "done")]
    Done,
    /// Finished with an error
    #[serde(rename = "error")]
    Error,
}

impl ChunkState {
    /// Whether the state is final
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether a worker has picked the chunk up and not yet finished it
    pub const fn is_active(self) -> bool {
        matches!(self, Self::UploadingChunk | Self::TranscribingChunk)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::UploadingChunk => 1,
            Self::TranscribingChunk => 2,
            Self::Done | Self::Error => 3,
        }
    }

    /// Whether a chunk may move from `self` to `next`
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Human readable label used in status messages
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::UploadingChunk => "Uploading chunk",
            Self::TranscribingChunk => "Transcribing chunk",
            Self::Done => "Done",
            Self::Error => "Error",
        }
    }
}

/// A `[start, end)` window of the source asset, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeWindow {
    /// Position in the plan, equal to temporal order
    pub index: usize,
    /// Window start
    pub start: f64,
    /// Window end, exclusive
    pub end: f64,
}

impl TimeWindow {
    /// Window length in seconds
    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

/// One time window of a chunked job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkTask {
    /// 0-based chunk index
    pub index: usize,
    /// Current state
    pub state: ChunkState,
    /// Window of the source this chunk covers
    pub window: TimeWindow,
    /// Local chunk file
    pub local_path: PathBuf,
    /// Remote name the chunk is uploaded under
    pub remote_blob_name: String,
    /// Transcript, set only when `Done`
    pub transcript: Option<String>,
    /// Error, set only when `Error`
    pub error: Option<String>,
}

impl ChunkTask {
    /// Create a pending chunk task
    pub fn pending(window: TimeWindow, local_path: PathBuf, remote_blob_name: String) -> Self {
        Self {
            index: window.index,
            state: ChunkState::Pending,
            window,
            local_path,
            remote_blob_name,
            transcript: None,
            error: None,
        }
    }
}

/// A tracked transcription job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Job id
    pub id: JobId,
    /// Processing path
    pub kind: JobKind,
    /// Current state
    pub state: JobState,
    /// Probed duration, 0 when unknown (capture jobs)
    pub estimated_duration_seconds: f64,
    /// Transcript, set only when `Done`
    pub transcript: Option<String>,
    /// Error, set only when `Error`
    pub error: Option<String>,
    /// Chunk tasks keyed by index, empty for single jobs and until splitting finishes
    pub chunks: BTreeMap<usize, ChunkTask>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job in the `Created` state
    pub fn new(id: JobId, kind: JobKind, estimated_duration_seconds: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            state: JobState::Created,
            estimated_duration_seconds,
            transcript: None,
            error: None,
            chunks: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which record a worker reports into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRef {
    /// A single job's top-level record
    Job(JobId),
    /// One chunk of a chunked job
    Chunk {
        /// Parent job
        job_id: JobId,
        /// Chunk index
        index: usize,
    },
}

impl RecordRef {
    /// Owning job
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Job(id) | Self::Chunk { job_id: id, .. } => *id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(id) => write!(f, "job {id}"),
            Self::Chunk { job_id, index } => write!(f, "job {job_id} chunk {index}"),
        }
    }
}

/// Progress milestones a worker reports while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    /// Transcoding an uploaded file
    Converting,
    /// Transcoding a live capture
    ConvertingCapture,
    /// Uploading to the blob store
    Uploading,
    /// Waiting on the provider
    Transcribing,
}

impl WorkerStage {
    /// Job state this stage corresponds to
    pub const fn job_state(self) -> JobState {
        match self {
            Self::Converting => JobState::Converting,
            Self::ConvertingCapture => JobState::ConvertingCapture,
            Self::Uploading => JobState::Uploading,
            Self::Transcribing => JobState::Transcribing,
        }
    }

    /// Chunk state this stage corresponds to, if chunks track it
    pub const fn chunk_state(self) -> Option<ChunkState> {
        match self {
            Self::Converting | Self::ConvertingCapture => None,
            Self::Uploading => Some(ChunkState::UploadingChunk),
            Self::Transcribing => Some(ChunkState::TranscribingChunk),
        }
    }
}

/// Audio encodings the provider is sent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    /// Lossless FLAC, used for uploaded files and chunks
    Flac,
    /// MP3, used for live captures
    Mp3,
}

impl AudioEncoding {
    /// File extension for this encoding
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
        }
    }
}

/// Recognition options sent with a provider operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// Audio encoding
    pub encoding: AudioEncoding,
    /// Sample rate of the uploaded audio
    pub sample_rate_hertz: u32,
    /// Language code
    pub language_code: String,
    /// Insert punctuation
    pub enable_automatic_punctuation: bool,
    /// Model tier
    pub model: String,
    /// Use the enhanced model
    pub use_enhanced: bool,
    /// Return word time offsets
    pub enable_word_time_offsets: bool,
    /// Speaker count when diarization is enabled
    pub diarization_speaker_count: Option<u32>,
}

impl RecognitionOptions {
    fn base(provider: &ProviderConfig, encoding: AudioEncoding) -> Self {
        Self {
            encoding,
            sample_rate_hertz: provider.sample_rate_hertz,
            language_code: provider.language_code.clone(),
            enable_automatic_punctuation: true,
            model: provider.model.clone(),
            use_enhanced: provider.use_enhanced,
            enable_word_time_offsets: true,
            diarization_speaker_count: Some(provider.diarization_speaker_count),
        }
    }

    /// Options for a whole uploaded file
    pub fn whole_file(provider: &ProviderConfig) -> Self {
        Self::base(provider, AudioEncoding::Flac)
    }

    /// Options for a live capture
    pub fn capture(provider: &ProviderConfig) -> Self {
        Self::base(provider, AudioEncoding::Mp3)
    }

    /// Options for one chunk; diarization needs the whole file, so it is off
    pub fn chunk(provider: &ProviderConfig) -> Self {
        Self {
            enable_word_time_offsets: false,
            diarization_speaker_count: None,
            ..Self::base(provider, AudioEncoding::Flac)
        }
    }
}

/// Chunk counters reported for chunked jobs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkCounts {
    /// Number of chunks
    pub total: usize,
    /// Chunks finished with a transcript
    pub done: usize,
    /// Chunks finished with an error
    pub failed: usize,
}

/// Aggregated view returned to pollers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusView {
    /// Job id
    pub job_id: JobId,
    /// Processing path
    pub kind: JobKind,
    /// Reported state
    pub status: JobState,
    /// Progress in percent
    pub progress: f64,
    /// Final or partial transcript
    pub transcript: Option<String>,
    /// Error description
    pub error: Option<String>,
    /// Human readable progress message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Chunk counters, chunked jobs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<ChunkCounts>,
    /// Probed duration
    pub estimated_duration_seconds: f64,
}

/// Receipt for an accepted job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JobTicket {
    /// Job id
    pub job_id: JobId,
    /// Chosen processing path
    pub kind: JobKind,
    /// Probed duration, 0 for captures
    pub estimated_duration_seconds: f64,
}

impl JobTicket {
    /// Duration in minutes rounded to two decimals
    pub fn estimated_duration_minutes(&self) -> f64 {
        (self.estimated_duration_seconds / 60.0 * 100.0).round() / 100.0
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_state_forward_only() {
        use JobState::*;

        assert!(Created.can_advance_to(Converting, JobKind::Single));
        assert!(Converting.can_advance_to(Uploading, JobKind::Single));
        assert!(Uploading.can_advance_to(Transcribing, JobKind::Single));
        assert!(Transcribing.can_advance_to(Done, JobKind::Single));
        assert!(Created.can_advance_to(Splitting, JobKind::Chunked));
        assert!(Splitting.can_advance_to(ChunkProcessing, JobKind::Chunked));
        assert!(ChunkProcessing.can_advance_to(Error, JobKind::Chunked));

        assert!(!Transcribing.can_advance_to(Uploading, JobKind::Single));
        assert!(!Done.can_advance_to(Error, JobKind::Single));
        assert!(!Error.can_advance_to(Done, JobKind::Chunked));
        assert!(!Uploading.can_advance_to(Uploading, JobKind::Single));
    }

    #[test]
    fn test_chunked_job_never_uploads_itself() {
        assert!(!JobState::ChunkProcessing.can_advance_to(JobState::Transcribing, JobKind::Chunked));
        assert!(!JobState::Created.can_advance_to(JobState::Uploading, JobKind::Chunked));
        assert!(!JobState::Created.can_advance_to(JobState::Splitting, JobKind::Single));
    }

    #[test]
    fn test_chunk_state_transitions() {
        assert!(ChunkState::Pending.can_advance_to(ChunkState::UploadingChunk));
        assert!(ChunkState::Pending.can_advance_to(ChunkState::Error));
        assert!(ChunkState::UploadingChunk.can_advance_to(ChunkState::TranscribingChunk));
        assert!(!ChunkState::TranscribingChunk.can_advance_to(ChunkState::UploadingChunk));
        assert!(!ChunkState::Done.can_advance_to(ChunkState::Error));
        assert!(ChunkState::TranscribingChunk.is_active());
        assert!(!ChunkState::Pending.is_active());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&JobState::ChunkProcessing).unwrap(),
            "\"chunk_processing\""
        );
        assert_eq!(
            serde_json::to_string(&ChunkState::UploadingChunk).unwrap(),
            "\"uploading_chunk\""
        );
        assert_eq!(serde_json::to_string(&JobKind::Chunked).unwrap(), "\"chunked\"");
        assert_eq!(serde_json::to_string(&AudioEncoding::Flac).unwrap(), "\"FLAC\"");
    }

    #[test]
    fn test_recognition_presets() {
        let provider = ProviderConfig::default();

        let whole = RecognitionOptions::whole_file(&provider);
        assert_eq!(whole.encoding, AudioEncoding::Flac);
        assert_eq!(whole.diarization_speaker_count, Some(2));
        assert!(whole.enable_word_time_offsets);

        let capture = RecognitionOptions::capture(&provider);
        assert_eq!(capture.encoding, AudioEncoding::Mp3);
        assert_eq!(capture.diarization_speaker_count, Some(2));

        let chunk = RecognitionOptions::chunk(&provider);
        assert_eq!(chunk.encoding, AudioEncoding::Flac);
        assert_eq!(chunk.diarization_speaker_count, None);
        assert!(!chunk.enable_word_time_offsets);
        assert_eq!(chunk.language_code, "en-US");
        assert_eq!(chunk.model, "video");
    }

    #[test]
    fn test_ticket_minutes_rounding() {
        let ticket = JobTicket {
            job_id: JobId::new(),
            kind: JobKind::Chunked,
            estimated_duration_seconds: 2_412.345,
        };
        assert_eq!(ticket.estimated_duration_minutes(), 40.21);
    }

    #[test]
    fn test_job_id_roundtrip_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_single_progress_table() {
        assert_eq!(JobState::Created.single_progress(), 0.0);
        assert_eq!(JobState::ConvertingCapture.single_progress(), 10.0);
        assert_eq!(JobState::Converting.single_progress(), 25.0);
        assert_eq!(JobState::Uploading.single_progress(), 50.0);
        assert_eq!(JobState::Transcribing.single_progress(), 75.0);
        assert_eq!(JobState::Done.single_progress(), 100.0);
        assert_eq!(JobState::Error.single_progress(), 0.0);
    }
}
