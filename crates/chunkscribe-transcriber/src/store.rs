//! In-memory job registry and the job state machine

use crate::aggregate::{ChunkPhase, aggregate, assembled_transcript, chunk_phase};
use crate::error::{TranscriptionError, TranscriptionResult};
use crate::handoff::TranscriptHandoff;
use crate::types::{
    ChunkState, ChunkTask, Job, JobId, JobKind, JobState, JobStatusView, RecordRef, WorkerStage,
};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal outcome written by [`JobStore::claim_terminal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// Finished with a transcript
    Done(String),
    /// Finished with an error
    Error(String),
}

impl Terminal {
    const fn state(&self) -> JobState {
        match self {
            Self::Done(_) => JobState::Done,
            Self::Error(_) => JobState::Error,
        }
    }
}

/// Registry of all jobs of this process
///
/// Each job sits behind its own lock. Readers clone a full snapshot under the
/// shared lock so they never observe a half-applied transition. Transcripts
/// reach the handoff in the order jobs were claimed `Done`.
pub struct JobStore {
    jobs: DashMap<JobId, Arc<RwLock<Job>>>,
    handoff: Arc<dyn TranscriptHandoff>,
    completions: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Empty store publishing completions to `handoff`
    pub fn new(handoff: Arc<dyn TranscriptHandoff>) -> Self {
        Self {
            jobs: DashMap::new(),
            handoff,
            completions: tokio::sync::Mutex::new(()),
        }
    }

    /// Handoff slot fed by completed jobs
    pub fn handoff(&self) -> &Arc<dyn TranscriptHandoff> {
        &self.handoff
    }

    /// Number of tracked jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is tracked
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether `id` is tracked
    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    fn entry(&self, id: JobId) -> TranscriptionResult<Arc<RwLock<Job>>> {
        self.jobs
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TranscriptionError::job_not_found(id))
    }

    /// Register a new job
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::DuplicateJob`] if the id is taken.
    pub fn insert(&self, job: Job) -> TranscriptionResult<()> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(TranscriptionError::DuplicateJob { job_id: job.id }),
            Entry::Vacant(slot) => {
                debug!("[job {}] registered as {}", job.id, job.kind);
                slot.insert(Arc::new(RwLock::new(job)));
                Ok(())
            }
        }
    }

    /// Consistent copy of a job record
    pub fn snapshot(&self, id: JobId) -> Option<Job> {
        let entry = self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))?;
        let job = entry.read().clone();
        Some(job)
    }

    /// Move a job to a later, non-terminal state
    ///
    /// Returns `false` and leaves the record untouched when the transition
    /// would go backwards, leave a terminal state, or is not valid for the
    /// job's kind.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn advance(&self, id: JobId, next: JobState) -> TranscriptionResult<bool> {
        let entry = self.entry(id)?;
        let mut job = entry.write();

        if next.is_terminal() || !job.state.can_advance_to(next, job.kind) {
            warn!(
                "[job {id}] refused transition {} -> {next} for {} job",
                job.state, job.kind
            );
            return Ok(false);
        }

        debug!("[job {id}] {} -> {next}", job.state);
        job.state = next;
        job.updated_at = Utc::now();
        Ok(true)
    }

    fn advance_chunk(&self, id: JobId, index: usize, next: ChunkState) -> TranscriptionResult<bool> {
        let entry = self.entry(id)?;
        let mut job = entry.write();
        let Some(chunk) = job.chunks.get_mut(&index) else {
            warn!("[job {id}] chunk {index} does not exist");
            return Ok(false);
        };

        if next.is_terminal() || !chunk.state.can_advance_to(next) {
            warn!(
                "[job {id}] chunk {index}: refused transition {:?} -> {next:?}",
                chunk.state
            );
            return Ok(false);
        }

        chunk.state = next;
        job.updated_at = Utc::now();
        Ok(true)
    }

    /// Record a worker's progress milestone
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn set_stage(&self, record: RecordRef, stage: WorkerStage) -> TranscriptionResult<bool> {
        match record {
            RecordRef::Job(id) => self.advance(id, stage.job_state()),
            RecordRef::Chunk { job_id, index } => match stage.chunk_state() {
                Some(state) => self.advance_chunk(job_id, index, state),
                None => Ok(false),
            },
        }
    }

    /// Attach the chunk plan to a splitting job and move it to `ChunkProcessing`
    ///
    /// The chunk set is fixed once populated; later calls are refused.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn populate_chunks(&self, id: JobId, chunks: Vec<ChunkTask>) -> TranscriptionResult<bool> {
        let entry = self.entry(id)?;
        let mut job = entry.write();

        if !job.chunks.is_empty()
            || !job.state.can_advance_to(JobState::ChunkProcessing, job.kind)
        {
            warn!("[job {id}] chunks already populated or job not splitting");
            return Ok(false);
        }

        job.chunks = chunks
            .into_iter()
            .map(|chunk| (chunk.index, chunk))
            .collect::<BTreeMap<_, _>>();
        job.state = JobState::ChunkProcessing;
        job.updated_at = Utc::now();
        info!("[job {id}] {} chunk(s) ready", job.chunks.len());
        Ok(true)
    }

    /// Record a chunk's terminal outcome
    ///
    /// Returns `false` if the chunk already finished.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn finish_chunk(
        &self,
        id: JobId,
        index: usize,
        outcome: Result<String, String>,
    ) -> TranscriptionResult<bool> {
        let entry = self.entry(id)?;
        let mut job = entry.write();
        let Some(chunk) = job.chunks.get_mut(&index) else {
            warn!("[job {id}] chunk {index} does not exist");
            return Ok(false);
        };
        if chunk.state.is_terminal() {
            return Ok(false);
        }

        match outcome {
            Ok(transcript) => {
                info!("[job {id}] chunk {index}: done");
                chunk.state = ChunkState::Done;
                chunk.transcript = Some(transcript);
                metrics::counter!("chunkscribe_chunks_completed_total").increment(1);
            }
            Err(error) => {
                warn!("[job {id}] chunk {index}: {error}");
                chunk.state = ChunkState::Error;
                chunk.error = Some(error);
                metrics::counter!("chunkscribe_chunks_failed_total").increment(1);
            }
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    /// Atomically move a non-terminal job to a terminal state
    ///
    /// Exactly one caller wins; every later claim returns `false` and
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn claim_terminal(&self, id: JobId, terminal: Terminal) -> TranscriptionResult<bool> {
        let entry = self.entry(id)?;
        let mut job = entry.write();
        Ok(Self::apply_terminal(&mut job, terminal))
    }

    fn apply_terminal(job: &mut Job, terminal: Terminal) -> bool {
        if job.state.is_terminal() {
            return false;
        }

        let next = terminal.state();
        let kind = job.kind.to_string();
        match terminal {
            Terminal::Done(transcript) => {
                job.transcript = Some(transcript);
                job.error = None;
                metrics::counter!("chunkscribe_jobs_completed_total", "kind" => kind).increment(1);
            }
            Terminal::Error(error) => {
                job.transcript = None;
                job.error = Some(error);
                metrics::counter!("chunkscribe_jobs_failed_total", "kind" => kind).increment(1);
            }
        }
        info!("[job {}] {} -> {next}", job.id, job.state);
        job.state = next;
        job.updated_at = Utc::now();
        true
    }

    async fn publish(&self, id: JobId, transcript: &str) {
        if let Err(e) = self.handoff.publish(transcript).await {
            warn!("[job {id}] failed to publish latest transcript: {e}");
        }
    }

    /// Finish a single job with its transcript and publish it
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub async fn complete_single(&self, id: JobId, transcript: String) -> TranscriptionResult<bool> {
        let _order = self.completions.lock().await;
        let claimed = self.claim_terminal(id, Terminal::Done(transcript.clone()))?;
        if claimed {
            self.publish(id, &transcript).await;
        }
        Ok(claimed)
    }

    /// Fail a job
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub fn fail(&self, id: JobId, error: impl Into<String>) -> TranscriptionResult<bool> {
        self.claim_terminal(id, Terminal::Error(error.into()))
    }

    /// Write a worker's final result into the record it reports to
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub async fn record_outcome(
        &self,
        record: RecordRef,
        outcome: &TranscriptionResult<String>,
    ) -> TranscriptionResult<bool> {
        match (record, outcome) {
            (RecordRef::Job(id), Ok(transcript)) => self.complete_single(id, transcript.clone()).await,
            (RecordRef::Job(id), Err(e)) => self.fail(id, e.to_string()),
            (RecordRef::Chunk { job_id, index }, outcome) => self.finish_chunk(
                job_id,
                index,
                outcome.as_ref().map(Clone::clone).map_err(ToString::to_string),
            ),
        }
    }

    /// Claim `Done` for a chunked job whose chunks all finished successfully
    fn claim_chunked_done(&self, id: JobId) -> TranscriptionResult<Option<String>> {
        let entry = self.entry(id)?;
        let mut job = entry.write();
        if job.state.is_terminal() || chunk_phase(&job) != ChunkPhase::Complete {
            return Ok(None);
        }

        let transcript = assembled_transcript(&job);
        if Self::apply_terminal(&mut job, Terminal::Done(transcript.clone())) {
            info!("[job {id}] all chunks processed, final transcript assembled");
            Ok(Some(transcript))
        } else {
            Ok(None)
        }
    }

    async fn settle_chunked_done(&self, id: JobId) -> TranscriptionResult<()> {
        let _order = self.completions.lock().await;
        if let Some(transcript) = self.claim_chunked_done(id)? {
            self.publish(id, &transcript).await;
        }
        Ok(())
    }

    /// Aggregated status of a job
    ///
    /// For a chunked job whose chunks are all done, the first reader to get
    /// here moves the job to `Done` and publishes the transcript; every other
    /// reader sees the same view without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub async fn status(&self, id: JobId) -> TranscriptionResult<JobStatusView> {
        let snapshot = self.snapshot(id).ok_or(TranscriptionError::job_not_found(id))?;

        if snapshot.kind == JobKind::Chunked
            && !snapshot.state.is_terminal()
            && chunk_phase(&snapshot) == ChunkPhase::Complete
        {
            self.settle_chunked_done(id).await?;
            let settled = self.snapshot(id).ok_or(TranscriptionError::job_not_found(id))?;
            return Ok(aggregate(&settled));
        }

        Ok(aggregate(&snapshot))
    }

    /// Settle a chunked job once its executor has finished
    ///
    /// All chunks done moves the job to `Done` (unless a poll already did);
    /// any failed chunk moves it to `Error` carrying the per-chunk details.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::JobNotFound`] for unknown ids.
    pub async fn finalize_chunked(&self, id: JobId) -> TranscriptionResult<JobState> {
        let snapshot = self.snapshot(id).ok_or(TranscriptionError::job_not_found(id))?;

        match chunk_phase(&snapshot) {
            ChunkPhase::Complete => self.settle_chunked_done(id).await?,
            ChunkPhase::Failed | ChunkPhase::Empty => {
                let error = aggregate(&snapshot)
                    .error
                    .unwrap_or_else(|| "No chunks found after splitting.".to_string());
                self.fail(id, error)?;
            }
            phase @ (ChunkPhase::Splitting | ChunkPhase::InFlight) => {
                warn!("[job {id}] finalized while {phase:?}");
                self.fail(id, "Chunk processing ended before all chunks finished")?;
            }
        }

        let settled = self.snapshot(id).ok_or(TranscriptionError::job_not_found(id))?;
        Ok(settled.state)
    }

    /// Number of jobs per state, for health reporting
    pub fn counts_by_state(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.jobs {
            let state = entry.value().read().state;
            *counts.entry(state.to_string()).or_insert(0) += 1;
        }
        counts
    }
}
