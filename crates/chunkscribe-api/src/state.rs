//! Application state management

use chunkscribe_core::{BlobBackend, Config, ProviderBackend};
use chunkscribe_transcriber::mock::{MockBlobStore, MockSpeechProvider};
use chunkscribe_transcriber::{
    BlobStore, Collaborators, FfmpegTranscoder, GcsBlobStore, GoogleSpeechProvider,
    JsonFileHandoff, LatestTranscriptSlot, MediaProbe, Orchestrator, SpeechProvider,
    TranscriptHandoff, TranscriptionResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Job orchestrator
    pub orchestrator: Arc<Orchestrator>,
    /// Directory uploads are saved to
    pub upload_dir: PathBuf,
    /// When the server started
    pub started_at: Instant,
}

impl AppState {
    /// Create application state around a running orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if the upload directory cannot be created.
    pub fn new(orchestrator: Arc<Orchestrator>) -> chunkscribe_core::Result<Self> {
        let upload_dir = orchestrator.config().storage.upload_dir.clone();
        std::fs::create_dir_all(&upload_dir)?;

        Ok(Self {
            orchestrator,
            upload_dir,
            started_at: Instant::now(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        self.orchestrator.config()
    }

    /// Check that uploads can be written
    ///
    /// # Errors
    ///
    /// Returns an error if the upload directory is missing or read-only.
    pub fn validate(&self) -> chunkscribe_core::Result<()> {
        if !self.upload_dir.is_dir() {
            return Err(chunkscribe_core::Error::configuration(format!(
                "Upload directory does not exist: {}",
                self.upload_dir.display()
            )));
        }

        let probe = self.upload_dir.join(".write_test");
        std::fs::write(&probe, "test")?;
        std::fs::remove_file(&probe)?;
        Ok(())
    }

    /// Seconds since the server started
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Build the collaborators selected by the configuration
///
/// The duration probe and transcoder always shell out to ffprobe/ffmpeg; the
/// blob store and speech provider can be swapped for in-process mocks.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built.
pub fn build_collaborators(config: &Config) -> TranscriptionResult<Collaborators> {
    let blob: Arc<dyn BlobStore> = match config.blob.backend {
        BlobBackend::Gcs => {
            if config.blob.access_token.is_none() {
                warn!("No blob access token configured; uploads will be unauthenticated");
            }
            Arc::new(GcsBlobStore::new(&config.blob)?)
        }
        BlobBackend::Memory => {
            info!("Using in-memory blob store");
            Arc::new(MockBlobStore::new(config.blob.bucket.clone()))
        }
    };

    let provider: Arc<dyn SpeechProvider> = match config.provider.backend {
        ProviderBackend::Google => Arc::new(GoogleSpeechProvider::new(&config.provider)?),
        ProviderBackend::Mock => {
            info!("Using mock speech provider");
            Arc::new(MockSpeechProvider::default())
        }
    };

    let handoff: Arc<dyn TranscriptHandoff> = match &config.handoff.path {
        Some(path) => {
            info!("Publishing completed transcripts to {}", path.display());
            Arc::new(JsonFileHandoff::new(path.clone()))
        }
        None => Arc::new(LatestTranscriptSlot::new()),
    };

    Ok(Collaborators {
        probe: Arc::new(MediaProbe::ffprobe("ffprobe")),
        transcoder: Arc::new(FfmpegTranscoder::default()),
        blob,
        provider,
        handoff,
    })
}
