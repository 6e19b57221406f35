//! Bounded queue and fixed worker pool for top-level job execution

use crate::error::{TranscriptionError, TranscriptionResult};
use crate::types::JobId;
use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use chunkscribe_core::DispatchConfig;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What a dispatched job has to do
#[derive(Debug, Clone, PartialEq)]
pub enum JobPlan {
    /// Transcode and transcribe an uploaded file in one pass
    Single {
        /// Uploaded file
        source: PathBuf,
    },
    /// Transcode and transcribe a live capture
    Capture {
        /// Recorded capture
        source: PathBuf,
    },
    /// Cut an uploaded file into windows and transcribe each one
    Chunked {
        /// Uploaded file
        source: PathBuf,
        /// Probed duration in seconds
        duration_seconds: f64,
    },
}

/// One queued job
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Registered job
    pub job_id: JobId,
    /// Work to perform
    pub plan: JobPlan,
}

/// Executes dequeued jobs
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the job to a terminal state
    async fn execute(&self, request: DispatchRequest);

    /// Called when `execute` panicked for `job_id`
    fn abort(&self, job_id: JobId, reason: &str);
}

/// Worker pool draining a bounded job queue
pub struct JobDispatcher {
    config: DispatchConfig,
    sender: Sender<DispatchRequest>,
    receiver: Receiver<DispatchRequest>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    runner: Arc<dyn JobRunner>,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("config", &self.config)
            .field("queued", &self.sender.len())
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    /// Create a dispatcher; no worker runs until [`start`](Self::start)
    pub fn new(config: DispatchConfig, runner: Arc<dyn JobRunner>) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_size.max(1));
        Self {
            config,
            sender,
            receiver,
            workers: Mutex::new(Vec::new()),
            runner,
        }
    }

    /// Spawn the worker tasks
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("Job dispatcher already started");
            return;
        }

        info!("Starting job dispatcher with {} workers", self.config.workers);
        for id in 0..self.config.workers.max(1) {
            workers.push(self.spawn_worker(id));
        }
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<()> {
        let receiver = self.receiver.clone();
        let runner = Arc::clone(&self.runner);

        tokio::spawn(async move {
            info!("Dispatcher worker {id} started");

            while let Ok(request) = receiver.recv().await {
                let job_id = request.job_id;
                info!("Dispatcher worker {id} picked up job {job_id}");

                let task_runner = Arc::clone(&runner);
                let run = tokio::spawn(async move { task_runner.execute(request).await });
                if let Err(e) = run.await {
                    error!("Dispatcher worker {id}: job {job_id} aborted: {e}");
                    runner.abort(job_id, &format!("Job execution aborted: {e}"));
                }
            }

            info!("Dispatcher worker {id} shutting down");
        })
    }

    /// Queue a job without waiting for room
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::QueueFull`] when every slot is taken and
    /// [`TranscriptionError::QueueClosed`] after shutdown.
    pub fn submit(&self, request: DispatchRequest) -> TranscriptionResult<()> {
        self.sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(rejected) => {
                warn!("Job queue full, refusing job {}", rejected.job_id);
                TranscriptionError::QueueFull {
                    capacity: self.sender.capacity().unwrap_or_default(),
                }
            }
            TrySendError::Closed(_) => TranscriptionError::QueueClosed,
        })
    }

    /// Jobs waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.receiver.len()
    }

    /// Queue capacity
    pub fn queue_capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }

    /// Whether the dispatcher stopped accepting jobs
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stop accepting jobs and wait for queued and running ones to finish
    pub async fn shutdown(&self) {
        info!("Shutting down job dispatcher");
        self.sender.close();

        let workers = std::mem::take(&mut *self.workers.lock());
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                warn!("Dispatcher worker {i} failed to shut down cleanly: {e}");
            }
        }

        info!("Job dispatcher shut down");
    }
}
