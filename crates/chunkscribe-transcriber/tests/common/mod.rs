//! Shared harness for orchestration tests

#![allow(dead_code)]

use chunkscribe_core::Config;
use chunkscribe_transcriber::mock::{
    MockBlobStore, MockProbe, MockSpeechProvider, MockTranscoder, RecordingHandoff,
};
use chunkscribe_transcriber::{Collaborators, Job, JobId, Orchestrator};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT_LOGGER: Once = Once::new();

/// Initialize test logging once per test binary
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Builder for a running orchestrator over mock collaborators
pub struct HarnessBuilder {
    config: Config,
    transcoder: MockTranscoder,
    blob: MockBlobStore,
    provider: MockSpeechProvider,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            transcoder: MockTranscoder::new(),
            blob: MockBlobStore::new("autoquiz"),
            provider: MockSpeechProvider::new("hello world"),
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.config.chunking.max_concurrent_chunks = limit;
        self
    }

    pub fn with_dispatch(mut self, workers: usize, queue_size: usize) -> Self {
        self.config.dispatch.workers = workers;
        self.config.dispatch.queue_size = queue_size;
        self
    }

    pub fn with_transcoder(mut self, transcoder: MockTranscoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_blob(mut self, blob: MockBlobStore) -> Self {
        self.blob = blob;
        self
    }

    pub fn with_provider_delay(mut self, delay: Duration) -> Self {
        self.provider = self.provider.with_delay(delay);
        self
    }

    pub fn build(self) -> TestHarness {
        init_test_logging();

        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = self.config;
        config.storage.upload_dir = dir.path().to_path_buf();
        config.handoff.path = None;

        let probe = Arc::new(MockProbe::fixed(0.0));
        let transcoder = Arc::new(self.transcoder);
        let blob = Arc::new(self.blob);
        let provider = Arc::new(self.provider);
        let handoff = Arc::new(RecordingHandoff::new());

        let orchestrator = Arc::new(Orchestrator::new(
            config,
            Collaborators {
                probe: probe.clone(),
                transcoder: transcoder.clone(),
                blob: blob.clone(),
                provider: provider.clone(),
                handoff: handoff.clone(),
            },
        ));
        orchestrator.start();

        TestHarness {
            orchestrator,
            probe,
            transcoder,
            blob,
            provider,
            handoff,
            dir,
        }
    }
}

/// Running orchestrator plus handles on every mock
pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub probe: Arc<MockProbe>,
    pub transcoder: Arc<MockTranscoder>,
    pub blob: Arc<MockBlobStore>,
    pub provider: Arc<MockSpeechProvider>,
    pub handoff: Arc<RecordingHandoff>,
    pub dir: TempDir,
}

impl TestHarness {
    /// Write an upload for `job_id` that probes as `duration` seconds
    pub fn upload(&self, job_id: JobId, duration: f64) -> PathBuf {
        let path = self.dir.path().join(format!("{job_id}_original.mp3"));
        std::fs::write(&path, b"uploaded audio").expect("write upload");
        self.probe.set(path.clone(), duration);
        path
    }

    /// Write a live capture for `job_id`
    pub fn capture(&self, job_id: JobId) -> PathBuf {
        let path = self.dir.path().join(format!("{job_id}_temp_mic.webm"));
        std::fs::write(&path, b"captured audio").expect("write capture");
        path
    }

    /// Blob name of chunk `index` of `job_id`
    pub fn chunk_blob(job_id: JobId, index: usize) -> String {
        format!("{job_id}_chunk_{index:03}.flac")
    }

    /// Wait until the stored job record is terminal
    pub async fn wait_terminal(&self, job_id: JobId) -> Job {
        let store = Arc::clone(self.orchestrator.store());
        tokio::time::timeout(Duration::from_secs(10), async move {
            loop {
                if let Some(job) = store.snapshot(job_id)
                    && job.state.is_terminal()
                {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }

    /// Files left in the working directory
    pub fn leftover_files(&self) -> Vec<String> {
        let mut names = std::fs::read_dir(self.dir.path())
            .expect("read temp dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
