//! Transcription worker driving one asset through transcode, upload and recognition

use crate::blob::BlobStore;
use crate::error::TranscriptionResult;
use crate::provider::{SpeechProvider, join_transcript};
use crate::store::JobStore;
use crate::transcode::{TranscodeRequest, Transcoder};
use crate::types::{RecognitionOptions, RecordRef, WorkerStage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything one worker run needs
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Record progress and the outcome are written to
    pub record: RecordRef,
    /// Asset to upload when no transcoding is requested
    pub source: PathBuf,
    /// Conversion to run first; its output is uploaded instead of `source`
    pub transcode: Option<TranscodeRequest>,
    /// Stage reported while transcoding
    pub convert_stage: WorkerStage,
    /// Remote name for the uploaded asset
    pub blob_name: String,
    /// Recognition options for the provider
    pub options: RecognitionOptions,
    /// How long to wait for the provider operation
    pub timeout: Duration,
    /// Local files removed when the run ends, whatever the outcome
    pub cleanup: Vec<PathBuf>,
}

impl WorkItem {
    fn upload_path(&self) -> &PathBuf {
        self.transcode
            .as_ref()
            .map_or(&self.source, |request| &request.output)
    }
}

/// Runs work items and records their progress into the job store
#[derive(Clone)]
pub struct TranscriptionWorker {
    store: Arc<JobStore>,
    transcoder: Arc<dyn Transcoder>,
    blob: Arc<dyn BlobStore>,
    provider: Arc<dyn SpeechProvider>,
}

impl std::fmt::Debug for TranscriptionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionWorker").finish_non_exhaustive()
    }
}

impl TranscriptionWorker {
    /// Create a worker over the given collaborators
    pub fn new(
        store: Arc<JobStore>,
        transcoder: Arc<dyn Transcoder>,
        blob: Arc<dyn BlobStore>,
        provider: Arc<dyn SpeechProvider>,
    ) -> Self {
        Self {
            store,
            transcoder,
            blob,
            provider,
        }
    }

    /// Run one item to completion
    ///
    /// The outcome is written into the item's record before returning. The
    /// uploaded blob and every listed local file are removed on all paths.
    pub async fn run(&self, item: WorkItem) -> TranscriptionResult<String> {
        let started = Instant::now();
        let mut uploaded = None;

        let outcome = self.drive(&item, &mut uploaded).await;
        match &outcome {
            Ok(transcript) => info!(
                "[{}] transcribed {} characters in {:.1}s",
                item.record,
                transcript.len(),
                started.elapsed().as_secs_f64()
            ),
            Err(e) => error!("[{}] failed: {e}", item.record),
        }

        self.clean_up(&item, uploaded.as_deref()).await;

        if let Err(e) = self.store.record_outcome(item.record, &outcome).await {
            warn!("[{}] could not record outcome: {e}", item.record);
        }
        metrics::histogram!("chunkscribe_worker_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn drive(
        &self,
        item: &WorkItem,
        uploaded: &mut Option<String>,
    ) -> TranscriptionResult<String> {
        if let Some(request) = &item.transcode {
            self.store.set_stage(item.record, item.convert_stage)?;
            self.transcoder.transcode(request).await?;
        }

        self.store.set_stage(item.record, WorkerStage::Uploading)?;
        let uri = self.blob.put(item.upload_path(), &item.blob_name).await?;
        *uploaded = Some(item.blob_name.clone());

        self.store.set_stage(item.record, WorkerStage::Transcribing)?;
        let handle = self.provider.submit(&uri, &item.options).await?;
        info!(
            "[{}] waiting for operation {} (timeout {}s)",
            item.record,
            handle.name,
            item.timeout.as_secs()
        );
        let results = self.provider.await_result(&handle, item.timeout).await?;

        Ok(join_transcript(&results))
    }

    async fn clean_up(&self, item: &WorkItem, uploaded: Option<&str>) {
        if let Some(name) = uploaded {
            match self.blob.delete(name).await {
                Ok(()) => info!("[{}] deleted blob {name}", item.record),
                Err(e) => warn!("[{}] failed to delete blob {name}: {e}", item.record),
            }
        }

        for path in &item.cleanup {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "[{}] failed to remove {}: {e}",
                    item.record,
                    path.display()
                ),
            }
        }
    }
}
