//! Job intake, routing and background execution

use crate::blob::BlobStore;
use crate::dispatch::{DispatchRequest, JobDispatcher, JobPlan, JobRunner};
use crate::error::{TranscriptionError, TranscriptionResult};
use crate::executor::BoundedExecutor;
use crate::handoff::TranscriptHandoff;
use crate::planner;
use crate::probe::DurationProbe;
use crate::provider::SpeechProvider;
use crate::store::JobStore;
use crate::transcode::{TranscodeRequest, Transcoder};
use crate::types::{
    AudioEncoding, ChunkTask, Job, JobId, JobKind, JobState, JobStatusView, JobTicket,
    RecognitionOptions, RecordRef, WorkerStage,
};
use crate::worker::{TranscriptionWorker, WorkItem};
use async_trait::async_trait;
use chunkscribe_core::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Duration probe
    pub probe: Arc<dyn DurationProbe>,
    /// Audio transcoder and cutter
    pub transcoder: Arc<dyn Transcoder>,
    /// Remote blob store
    pub blob: Arc<dyn BlobStore>,
    /// Speech provider
    pub provider: Arc<dyn SpeechProvider>,
    /// Completed-transcript slot
    pub handoff: Arc<dyn TranscriptHandoff>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Remove a file, ignoring one that is already gone
async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", path.display()),
    }
}

fn sibling(source: &Path, file_name: String) -> PathBuf {
    source
        .parent()
        .map_or_else(|| PathBuf::from(&file_name), |dir| dir.join(&file_name))
}

/// Runs dequeued jobs
struct Pipeline {
    config: Arc<Config>,
    store: Arc<JobStore>,
    transcoder: Arc<dyn Transcoder>,
    worker: TranscriptionWorker,
}

impl Pipeline {
    fn whole_file_item(&self, job_id: JobId, source: PathBuf, capture: bool) -> WorkItem {
        let provider = &self.config.provider;
        let (encoding, output_name, stage, options) = if capture {
            (
                AudioEncoding::Mp3,
                format!("{job_id}_mic_recorded.mp3"),
                WorkerStage::ConvertingCapture,
                RecognitionOptions::capture(provider),
            )
        } else {
            (
                AudioEncoding::Flac,
                format!("{job_id}.flac"),
                WorkerStage::Converting,
                RecognitionOptions::whole_file(provider),
            )
        };
        let output = sibling(&source, output_name);

        WorkItem {
            record: RecordRef::Job(job_id),
            source: source.clone(),
            transcode: Some(TranscodeRequest {
                input: source.clone(),
                output: output.clone(),
                encoding,
                sample_rate_hertz: provider.sample_rate_hertz,
                window: None,
            }),
            convert_stage: stage,
            blob_name: format!("{job_id}.{}", encoding.extension()),
            options,
            timeout: self.config.chunking.whole_file_timeout(),
            cleanup: vec![source, output],
        }
    }

    /// Cut every window; on failure the chunk files cut so far are removed
    async fn split(
        &self,
        job_id: JobId,
        source: &Path,
        duration: f64,
    ) -> TranscriptionResult<Vec<ChunkTask>> {
        let windows = planner::plan(duration, self.config.chunking.chunk_length_seconds);
        if windows.is_empty() {
            return Err(TranscriptionError::transcode_failure(
                "No chunks found after splitting.",
            ));
        }

        info!(
            "[job {job_id}] splitting {duration:.1}s into {} chunk(s)",
            windows.len()
        );

        let mut tasks: Vec<ChunkTask> = Vec::with_capacity(windows.len());
        for window in windows {
            let name = format!("{job_id}_chunk_{:03}.flac", window.index);
            let local_path = sibling(source, name.clone());
            let request = TranscodeRequest {
                input: source.to_path_buf(),
                output: local_path.clone(),
                encoding: AudioEncoding::Flac,
                sample_rate_hertz: self.config.provider.sample_rate_hertz,
                window: Some(window),
            };

            if let Err(e) = self.transcoder.transcode(&request).await {
                error!("[job {job_id}] cutting chunk {} failed: {e}", window.index);
                remove_quietly(&local_path).await;
                for task in &tasks {
                    remove_quietly(&task.local_path).await;
                }
                return Err(e);
            }
            tasks.push(ChunkTask::pending(window, local_path, name));
        }
        Ok(tasks)
    }

    /// The worker has already stored the outcome
    async fn run_whole_file(&self, job_id: JobId, item: WorkItem) {
        match self.worker.run(item).await {
            Ok(transcript) => debug!("[job {job_id}] finished with {} chars", transcript.len()),
            Err(e) => debug!("[job {job_id}] finished with error: {e}"),
        }
    }

    async fn run_chunked(&self, job_id: JobId, source: PathBuf, duration: f64) {
        if let Err(e) = self.store.advance(job_id, JobState::Splitting) {
            error!("[job {job_id}] cannot start splitting: {e}");
            return;
        }

        let split = self.split(job_id, &source, duration).await;
        remove_quietly(&source).await;

        let tasks = match split {
            Ok(tasks) => tasks,
            Err(e) => {
                if let Err(store_err) = self.store.fail(job_id, e.to_string()) {
                    error!("[job {job_id}] cannot record split failure: {store_err}");
                }
                return;
            }
        };

        match self.store.populate_chunks(job_id, tasks.clone()) {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.store.fail(job_id, "Chunk plan could not be registered") {
                    error!("[job {job_id}] cannot record failure: {e}");
                }
                for task in &tasks {
                    remove_quietly(&task.local_path).await;
                }
                return;
            }
            Err(e) => {
                error!("[job {job_id}] cannot register chunks: {e}");
                return;
            }
        }

        let options = RecognitionOptions::chunk(&self.config.provider);
        let timeout = self.config.chunking.chunk_timeout();
        let items = tasks
            .into_iter()
            .map(|task| WorkItem {
                record: RecordRef::Chunk {
                    job_id,
                    index: task.index,
                },
                source: task.local_path.clone(),
                transcode: None,
                convert_stage: WorkerStage::Converting,
                blob_name: task.remote_blob_name,
                options: options.clone(),
                timeout,
                cleanup: vec![task.local_path],
            })
            .collect::<Vec<_>>();

        let executor = BoundedExecutor::new(self.config.chunking.max_concurrent_chunks);
        let worker = self.worker.clone();
        let outcomes = executor
            .run(items, move |item| {
                let worker = worker.clone();
                async move { worker.run(item).await }
            })
            .await;

        // Items lost to a panic never reached the store
        for outcome in outcomes {
            if let Err(e) = outcome.result
                && let Err(store_err) =
                    self.store
                        .finish_chunk(job_id, outcome.index, Err(e.to_string()))
            {
                warn!("[job {job_id}] chunk {}: {store_err}", outcome.index);
            }
        }

        match self.store.finalize_chunked(job_id).await {
            Ok(state) => info!("[job {job_id}] chunked job finished as {state}"),
            Err(e) => error!("[job {job_id}] cannot finalize: {e}"),
        }
    }
}

#[async_trait]
impl JobRunner for Pipeline {
    async fn execute(&self, request: DispatchRequest) {
        let job_id = request.job_id;
        match request.plan {
            JobPlan::Single { source } => {
                let item = self.whole_file_item(job_id, source, false);
                self.run_whole_file(job_id, item).await;
            }
            JobPlan::Capture { source } => {
                let item = self.whole_file_item(job_id, source, true);
                self.run_whole_file(job_id, item).await;
            }
            JobPlan::Chunked {
                source,
                duration_seconds,
            } => self.run_chunked(job_id, source, duration_seconds).await,
        }
    }

    fn abort(&self, job_id: JobId, reason: &str) {
        if let Err(e) = self.store.fail(job_id, reason) {
            error!("[job {job_id}] cannot record abort: {e}");
        }
    }
}

/// Accepts jobs, routes them and runs them in the background
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<JobStore>,
    probe: Arc<dyn DurationProbe>,
    dispatcher: JobDispatcher,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator; call [`start`](Self::start) before submitting
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(JobStore::new(collaborators.handoff));
        let worker = TranscriptionWorker::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.transcoder),
            collaborators.blob,
            collaborators.provider,
        );
        let pipeline = Arc::new(Pipeline {
            config: Arc::clone(&config),
            store: Arc::clone(&store),
            transcoder: collaborators.transcoder,
            worker,
        });
        let dispatcher = JobDispatcher::new(config.dispatch.clone(), pipeline);

        Self {
            config,
            store,
            probe: collaborators.probe,
            dispatcher,
        }
    }

    /// Start the background workers
    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Job registry
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Jobs waiting for a dispatcher worker
    pub fn queue_depth(&self) -> usize {
        self.dispatcher.queue_depth()
    }

    async fn dispatch(&self, job_id: JobId, kind: JobKind, plan: JobPlan) -> TranscriptionResult<()> {
        let source = match &plan {
            JobPlan::Single { source }
            | JobPlan::Capture { source }
            | JobPlan::Chunked { source, .. } => source.clone(),
        };

        if let Err(e) = self.dispatcher.submit(DispatchRequest { job_id, plan }) {
            self.store.fail(job_id, e.to_string())?;
            remove_quietly(&source).await;
            return Err(e);
        }

        metrics::counter!("chunkscribe_jobs_submitted_total", "kind" => kind.to_string())
            .increment(1);
        Ok(())
    }

    /// Accept an uploaded file
    ///
    /// The file is probed and routed before any job exists; a rejected file
    /// is deleted and no job is created.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::UnusableInput`] for an undeterminable or
    /// too long duration, [`TranscriptionError::QueueFull`] when the dispatch
    /// queue has no room and [`TranscriptionError::QueueClosed`] after
    /// shutdown. A refused job is marked failed and its upload deleted.
    pub async fn submit_file(&self, job_id: JobId, path: PathBuf) -> TranscriptionResult<JobTicket> {
        let duration = self.probe.probe_duration(&path).await;

        let kind = match planner::route(&path, duration, &self.config.chunking) {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Rejected {}: {e}", path.display());
                metrics::counter!("chunkscribe_jobs_rejected_total").increment(1);
                remove_quietly(&path).await;
                return Err(e);
            }
        };

        self.store.insert(Job::new(job_id, kind, duration))?;
        info!(
            "[job {job_id}] accepted {} ({duration:.1}s) as {kind}",
            path.display()
        );

        let plan = match kind {
            JobKind::Single => JobPlan::Single { source: path },
            JobKind::Chunked => JobPlan::Chunked {
                source: path,
                duration_seconds: duration,
            },
        };
        self.dispatch(job_id, kind, plan).await?;

        Ok(JobTicket {
            job_id,
            kind,
            estimated_duration_seconds: duration,
        })
    }

    /// Accept a live capture; always single, never probed
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::QueueFull`] or
    /// [`TranscriptionError::QueueClosed`] when the job cannot be queued.
    pub async fn submit_capture(&self, job_id: JobId, path: PathBuf) -> TranscriptionResult<JobTicket> {
        self.store.insert(Job::new(job_id, JobKind::Single, 0.0))?;
        info!("[job {job_id}] accepted live capture {}", path.display());
        self.dispatch(job_id, JobKind::Single, JobPlan::Capture { source: path })
            .await?;

        Ok(JobTicket {
            job_id,
            kind: JobKind::Single,
            estimated_duration_seconds: 0.0,
        })
    }

    /// Aggregated status of a job
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub async fn status(&self, job_id: JobId) -> TranscriptionResult<JobStatusView> {
        self.store.status(job_id).await
    }

    /// Most recently completed transcript
    pub fn latest_transcript(&self) -> Option<String> {
        self.store.handoff().latest()
    }

    /// Stop accepting jobs and wait for running ones
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
