//! Configuration management for chunkscribe

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Local scratch storage for uploads and intermediate audio
    #[serde(default)]
    pub storage: StorageConfig,

    /// Routing, segmentation and per-chunk concurrency
    #[serde(default)]
    #[validate(nested)]
    pub chunking: ChunkingConfig,

    /// Top-level job dispatcher pool
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Speech provider configuration
    #[serde(default)]
    #[validate(nested)]
    pub provider: ProviderConfig,

    /// Remote blob store configuration
    #[serde(default)]
    #[validate(nested)]
    pub blob: BlobConfig,

    /// Completed-transcript handoff
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[validate(range(min = 1))]
    pub max_upload_bytes: usize,
}

/// Local scratch storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for uploads, transcoded files and chunk segments
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Accepted upload extensions, including the leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Routing and segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_chunking_bounds"))]
pub struct ChunkingConfig {
    /// Durations strictly above this are split into chunks
    #[serde(default = "default_long_form_threshold")]
    #[validate(range(min = 1.0))]
    pub long_form_threshold_seconds: f64,

    /// Durations strictly above this are rejected
    #[serde(default = "default_max_duration")]
    #[validate(range(min = 1.0))]
    pub max_duration_seconds: f64,

    /// Target length of each chunk
    #[serde(default = "default_chunk_length")]
    #[validate(range(min = 1.0))]
    pub chunk_length_seconds: f64,

    /// Concurrency ceiling for chunk workers within one job
    #[serde(default = "default_max_concurrent_chunks")]
    #[validate(range(min = 1))]
    pub max_concurrent_chunks: usize,

    /// Provider wait timeout for whole-file and capture jobs
    #[serde(default = "default_whole_file_timeout")]
    #[validate(range(min = 1))]
    pub whole_file_timeout_seconds: u64,

    /// Chunk wait timeout as a multiple of the chunk length
    #[serde(default = "default_chunk_timeout_multiplier")]
    #[validate(range(min = 1))]
    pub chunk_timeout_multiplier: u32,
}

/// Top-level job dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Number of jobs executed concurrently
    #[serde(default = "default_dispatch_workers")]
    #[validate(range(min = 1))]
    pub workers: usize,

    /// Jobs waiting for a free dispatcher worker
    #[serde(default = "default_dispatch_queue_size")]
    #[validate(range(min = 1))]
    pub queue_size: usize,
}

/// Which speech backend to drive
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderBackend {
    /// Google Cloud Speech-to-Text long-running recognition
    #[default]
    Google,
    /// Scripted in-process provider, for local runs without credentials
    Mock,
}

/// Speech provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: ProviderBackend,

    /// Base URL of the speech REST API
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,

    /// OAuth bearer token sent with every request
    #[serde(default)]
    pub access_token: Option<String>,

    /// BCP-47 language code
    #[serde(default = "default_language_code")]
    pub language_code: String,

    /// Recognition model tier
    #[serde(default = "default_model")]
    pub model: String,

    /// Request the enhanced variant of the model
    #[serde(default = "default_true")]
    pub use_enhanced: bool,

    /// Sample rate every transcoded asset is produced at
    #[serde(default = "default_sample_rate")]
    #[validate(range(min = 8000, max = 48000))]
    pub sample_rate_hertz: u32,

    /// Expected speaker count when diarization is enabled
    #[serde(default = "default_speaker_count")]
    #[validate(range(min = 1))]
    pub diarization_speaker_count: u32,

    /// Interval between operation polls
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,

    /// Timeout for a single HTTP request to the provider
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub request_timeout_seconds: u64,
}

/// Which blob store to use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    /// Google Cloud Storage JSON API
    #[default]
    Gcs,
    /// In-process map, for local runs without credentials
    Memory,
}

/// Remote blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BlobConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: BlobBackend,

    /// Bucket receiving transcoded audio
    #[serde(default = "default_bucket")]
    #[validate(length(min = 1))]
    pub bucket: String,

    /// Base URL of the storage API
    #[serde(default = "default_storage_base_url")]
    pub base_url: String,

    /// OAuth bearer token sent with every request
    #[serde(default)]
    pub access_token: Option<String>,

    /// Timeout for a single upload
    #[serde(default = "default_upload_timeout")]
    #[validate(range(min = 1))]
    pub upload_timeout_seconds: u64,
}

/// Completed-transcript handoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// File rewritten with the most recent transcript; in-memory only when unset
    #[serde(default = "default_handoff_path")]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5001
}

const fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_allowed_extensions() -> Vec<String> {
    [".mp3", ".wav", ".flac", ".ogg", ".opus", ".webm", ".mp4", ".m4a"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_long_form_threshold() -> f64 {
    30.0 * 60.0
}

const fn default_max_duration() -> f64 {
    8.0 * 3600.0
}

const fn default_chunk_length() -> f64 {
    900.0
}

const fn default_max_concurrent_chunks() -> usize {
    5
}

const fn default_whole_file_timeout() -> u64 {
    10_800
}

const fn default_chunk_timeout_multiplier() -> u32 {
    4
}

const fn default_dispatch_workers() -> usize {
    4
}

const fn default_dispatch_queue_size() -> usize {
    256
}

fn default_speech_base_url() -> String {
    "https://speech.googleapis.com".to_string()
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_model() -> String {
    "video".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_sample_rate() -> u32 {
    16_000
}

const fn default_speaker_count() -> u32 {
    2
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_request_timeout() -> u64 {
    60
}

fn default_bucket() -> String {
    "autoquiz".to_string()
}

fn default_storage_base_url() -> String {
    "https://storage.googleapis.com".to_string()
}

const fn default_upload_timeout() -> u64 {
    1_200
}

fn default_handoff_path() -> Option<PathBuf> {
    Some(PathBuf::from("latest_transcript.json"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn validate_chunking_bounds(chunking: &ChunkingConfig) -> Result<(), ValidationError> {
    if chunking.long_form_threshold_seconds >= chunking.max_duration_seconds {
        let mut err = ValidationError::new("threshold_above_ceiling");
        err.message = Some("long_form_threshold_seconds must be below max_duration_seconds".into());
        return Err(err);
    }
    Ok(())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            long_form_threshold_seconds: default_long_form_threshold(),
            max_duration_seconds: default_max_duration(),
            chunk_length_seconds: default_chunk_length(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            whole_file_timeout_seconds: default_whole_file_timeout(),
            chunk_timeout_multiplier: default_chunk_timeout_multiplier(),
        }
    }
}

impl ChunkingConfig {
    /// Provider wait timeout for whole-file and capture jobs
    #[must_use]
    pub const fn whole_file_timeout(&self) -> Duration {
        Duration::from_secs(self.whole_file_timeout_seconds)
    }

    /// Provider wait timeout for one chunk
    #[must_use]
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_length_seconds * f64::from(self.chunk_timeout_multiplier))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_dispatch_workers(),
            queue_size: default_dispatch_queue_size(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::default(),
            base_url: default_speech_base_url(),
            access_token: None,
            language_code: default_language_code(),
            model: default_model(),
            use_enhanced: default_true(),
            sample_rate_hertz: default_sample_rate(),
            diarization_speaker_count: default_speaker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            bucket: default_bucket(),
            base_url: default_storage_base_url(),
            access_token: None,
            upload_timeout_seconds: default_upload_timeout(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            path: default_handoff_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file and the environment
    ///
    /// Without an explicit path, `chunkscribe.{toml,json,yaml}` in the working
    /// directory is read when present. Environment variables use the
    /// `CHUNKSCRIBE__SECTION__KEY` form and override file values.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails validation.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("chunkscribe").required(false),
        };

        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("CHUNKSCRIBE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}
