//! Scripted collaborators for tests and credential-free local runs

use crate::blob::BlobStore;
use crate::error::{TranscriptionError, TranscriptionResult};
use crate::handoff::{LatestTranscriptSlot, TranscriptHandoff};
use crate::probe::DurationProbe;
use crate::provider::{OperationHandle, RecognitionResult, SpeechProvider};
use crate::transcode::{TranscodeRequest, Transcoder};
use crate::types::RecognitionOptions;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Probe returning configured durations
#[derive(Debug, Default)]
pub struct MockProbe {
    default: f64,
    durations: Mutex<HashMap<PathBuf, f64>>,
}

impl MockProbe {
    /// Report `seconds` for every file
    pub fn fixed(seconds: f64) -> Self {
        Self {
            default: seconds,
            durations: Mutex::new(HashMap::new()),
        }
    }

    /// Report `seconds` for one file
    pub fn set(&self, path: impl Into<PathBuf>, seconds: f64) {
        self.durations.lock().insert(path.into(), seconds);
    }
}

#[async_trait]
impl DurationProbe for MockProbe {
    async fn probe_duration(&self, path: &Path) -> f64 {
        self.durations
            .lock()
            .get(path)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Transcoder writing placeholder output files
#[derive(Debug, Default)]
pub struct MockTranscoder {
    fail_all: Option<String>,
    failing_windows: HashSet<usize>,
    requests: Mutex<Vec<TranscodeRequest>>,
}

impl MockTranscoder {
    /// Transcoder that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_all = Some(message.into());
        self
    }

    /// Fail cutting the window with this index
    #[must_use]
    pub fn failing_window(mut self, index: usize) -> Self {
        self.failing_windows.insert(index);
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> TranscriptionResult<()> {
        self.requests.lock().push(request.clone());

        if let Some(message) = &self.fail_all {
            return Err(TranscriptionError::transcode_failure(message.clone()));
        }
        if let Some(window) = request.window
            && self.failing_windows.contains(&window.index)
        {
            return Err(TranscriptionError::transcode_failure(format!(
                "cannot cut window {}",
                window.index
            )));
        }

        tokio::fs::write(&request.output, b"mock audio").await?;
        Ok(())
    }
}

/// In-memory blob store recording every call
#[derive(Debug)]
pub struct MockBlobStore {
    bucket: String,
    objects: Mutex<HashSet<String>>,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_put: bool,
    fail_delete: bool,
}

impl Default for MockBlobStore {
    fn default() -> Self {
        Self::new("mock-bucket")
    }
}

impl MockBlobStore {
    /// Empty store for `bucket`
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashSet::new()),
            puts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            fail_put: false,
            fail_delete: false,
        }
    }

    /// Reject every upload
    #[must_use]
    pub const fn failing_puts(mut self) -> Self {
        self.fail_put = true;
        self
    }

    /// Reject every delete
    #[must_use]
    pub const fn failing_deletes(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    /// Names currently stored
    pub fn live(&self) -> Vec<String> {
        let mut names = self.objects.lock().iter().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Names uploaded, in call order
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().clone()
    }

    /// Names deleted, in call order
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn put(&self, local: &Path, name: &str) -> TranscriptionResult<String> {
        if self.fail_put {
            return Err(TranscriptionError::upload_failure(name, "mock upload refused"));
        }
        if !tokio::fs::try_exists(local).await? {
            return Err(TranscriptionError::upload_failure(
                name,
                format!("{} does not exist", local.display()),
            ));
        }

        self.puts.lock().push(name.to_string());
        self.objects.lock().insert(name.to_string());
        Ok(format!("mock://{}/{name}", self.bucket))
    }

    async fn delete(&self, name: &str) -> TranscriptionResult<()> {
        self.deletes.lock().push(name.to_string());
        if self.fail_delete {
            return Err(TranscriptionError::upload_failure(name, "mock delete refused"));
        }
        self.objects.lock().remove(name);
        Ok(())
    }
}

/// How the mock provider answers for one blob
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with these result fragments
    Transcript(Vec<String>),
    /// Report a failed operation
    Fail(String),
    /// Never finish
    Hang,
}

/// Provider answering from a per-blob script
#[derive(Debug)]
pub struct MockSpeechProvider {
    default_transcript: String,
    delay: Duration,
    scripts: Mutex<HashMap<String, Script>>,
    delays: Mutex<HashMap<String, Duration>>,
    submissions: Mutex<Vec<(String, RecognitionOptions)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MockSpeechProvider {
    fn default() -> Self {
        Self::new("mock transcript")
    }
}

impl MockSpeechProvider {
    /// Provider answering `default_transcript` for unscripted blobs
    pub fn new(default_transcript: impl Into<String>) -> Self {
        Self {
            default_transcript: default_transcript.into(),
            delay: Duration::ZERO,
            scripts: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Wait this long in every operation
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Script the answer for blob `name`
    pub fn script(&self, name: impl Into<String>, script: Script) {
        self.scripts.lock().insert(name.into(), script);
    }

    /// Answer `text` for blob `name`
    pub fn transcript_for(&self, name: impl Into<String>, text: impl Into<String>) {
        self.script(name, Script::Transcript(vec![text.into()]));
    }

    /// Wait `delay` for blob `name` instead of the default
    pub fn delay_for(&self, name: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(name.into(), delay);
    }

    /// Blob names and options submitted so far
    pub fn submissions(&self) -> Vec<(String, RecognitionOptions)> {
        self.submissions.lock().clone()
    }

    /// Highest number of operations awaited at the same time
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn run_operation(&self, name: &str) -> TranscriptionResult<Vec<RecognitionResult>> {
        let delay = self.delays.lock().get(name).copied().unwrap_or(self.delay);
        let script = self.scripts.lock().get(name).cloned();

        if !delay.is_zero() {
            sleep(delay).await;
        }

        match script {
            None => Ok(vec![RecognitionResult::single(self.default_transcript.clone())]),
            Some(Script::Transcript(parts)) => {
                Ok(parts.into_iter().map(RecognitionResult::single).collect())
            }
            Some(Script::Fail(message)) => Err(TranscriptionError::provider_failure(message)),
            Some(Script::Hang) => std::future::pending().await,
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechProvider for MockSpeechProvider {
    async fn submit(
        &self,
        uri: &str,
        options: &RecognitionOptions,
    ) -> TranscriptionResult<OperationHandle> {
        let name = uri.rsplit('/').next().unwrap_or(uri).to_string();
        self.submissions.lock().push((name.clone(), options.clone()));
        Ok(OperationHandle { name })
    }

    async fn await_result(
        &self,
        handle: &OperationHandle,
        timeout: Duration,
    ) -> TranscriptionResult<Vec<RecognitionResult>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        tokio::time::timeout(timeout, self.run_operation(&handle.name))
            .await
            .map_err(|_| TranscriptionError::provider_timeout(timeout.as_secs()))?
    }
}

/// Handoff remembering every publish
#[derive(Debug, Default)]
pub struct RecordingHandoff {
    slot: LatestTranscriptSlot,
    published: Mutex<Vec<String>>,
}

impl RecordingHandoff {
    /// Empty handoff
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transcript published, in order
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl TranscriptHandoff for RecordingHandoff {
    async fn publish(&self, transcript: &str) -> TranscriptionResult<()> {
        self.published.lock().push(transcript.to_string());
        self.slot.publish(transcript).await
    }

    fn latest(&self) -> Option<String> {
        self.slot.latest()
    }
}
