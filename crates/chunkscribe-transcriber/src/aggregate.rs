//! Read-time aggregation of job and chunk records into a status view
//!
//! A chunked job's view is derived from a snapshot by first classifying it
//! into a [`ChunkPhase`] and then rendering that phase. Every edge case
//! (still splitting, no chunks, some failed, all done, in flight) is one arm.

use crate::error::TranscriptionError;
use crate::types::{ChunkCounts, ChunkState, Job, JobKind, JobState, JobStatusView};

/// Aggregate phase of a chunked job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    /// Chunks not cut yet
    Splitting,
    /// Splitting finished without producing chunks
    Empty,
    /// At least one chunk failed
    Failed,
    /// Every chunk is done
    Complete,
    /// Chunks still running, none failed
    InFlight,
}

#[derive(Debug, Default)]
struct Tally {
    counts: ChunkCounts,
    transcript_parts: Vec<String>,
    errors: Vec<String>,
    pending: Vec<String>,
}

impl Tally {
    fn of(job: &Job) -> Self {
        let mut tally = Self {
            counts: ChunkCounts {
                total: job.chunks.len(),
                ..ChunkCounts::default()
            },
            ..Self::default()
        };

        // BTreeMap iteration is in ascending chunk index
        for chunk in job.chunks.values() {
            match chunk.state {
                ChunkState::Done => {
                    tally.counts.done += 1;
                    if let Some(text) = chunk.transcript.as_deref().filter(|t| !t.is_empty()) {
                        tally.transcript_parts.push(text.to_string());
                    }
                }
                ChunkState::Error => {
                    tally.counts.failed += 1;
                    tally.errors.push(format!(
                        "Chunk {}: Error - {}",
                        chunk.index,
                        chunk.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                ChunkState::Pending | ChunkState::UploadingChunk | ChunkState::TranscribingChunk => {
                    tally
                        .pending
                        .push(format!("Chunk {}: {}", chunk.index, chunk.state.label()));
                }
            }
        }
        tally
    }

    fn progress(&self) -> f64 {
        if self.counts.total == 0 {
            return 0.0;
        }
        self.counts.done as f64 / self.counts.total as f64 * 100.0
    }

    fn transcript(&self) -> String {
        self.transcript_parts.join(" ")
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Classify a chunked job snapshot
pub fn chunk_phase(job: &Job) -> ChunkPhase {
    if job.chunks.is_empty() {
        return match job.state {
            JobState::Created | JobState::Splitting => ChunkPhase::Splitting,
            _ => ChunkPhase::Empty,
        };
    }

    let mut done = 0;
    for chunk in job.chunks.values() {
        match chunk.state {
            ChunkState::Error => return ChunkPhase::Failed,
            ChunkState::Done => done += 1,
            _ => {}
        }
    }

    if done == job.chunks.len() {
        ChunkPhase::Complete
    } else {
        ChunkPhase::InFlight
    }
}

/// Transcript of a job whose chunks are all done, in chunk-index order
pub fn assembled_transcript(job: &Job) -> String {
    Tally::of(job).transcript()
}

/// Derive the status view for a job snapshot
pub fn aggregate(job: &Job) -> JobStatusView {
    match job.kind {
        JobKind::Single => single_view(job),
        JobKind::Chunked => chunked_view(job, chunk_phase(job)),
    }
}

fn single_view(job: &Job) -> JobStatusView {
    JobStatusView {
        job_id: job.id,
        kind: job.kind,
        status: job.state,
        progress: job.state.single_progress(),
        transcript: job.transcript.clone(),
        error: job.error.clone(),
        message: None,
        chunks: None,
        estimated_duration_seconds: job.estimated_duration_seconds,
    }
}

fn chunked_view(job: &Job, phase: ChunkPhase) -> JobStatusView {
    let tally = Tally::of(job);
    let mut view = JobStatusView {
        job_id: job.id,
        kind: job.kind,
        status: job.state,
        progress: 0.0,
        transcript: None,
        error: None,
        message: None,
        chunks: Some(tally.counts),
        estimated_duration_seconds: job.estimated_duration_seconds,
    };

    match phase {
        ChunkPhase::Splitting => {
            view.message = Some("Splitting audio into chunks...".to_string());
        }
        ChunkPhase::Empty => {
            view.error = job.error.clone();
            view.message = Some(
                job.error
                    .clone()
                    .unwrap_or_else(|| "No chunks found after splitting.".to_string()),
            );
        }
        ChunkPhase::Failed => {
            view.status = JobState::Error;
            view.progress = tally.progress();
            view.error = Some(
                TranscriptionError::PartialChunkFailure {
                    failed: tally.counts.failed,
                    details: tally.errors.join("; "),
                }
                .to_string(),
            );
            view.transcript = non_empty(tally.transcript());
        }
        ChunkPhase::Complete => {
            view.status = JobState::Done;
            view.progress = 100.0;
            view.transcript = Some(
                job.transcript
                    .clone()
                    .unwrap_or_else(|| tally.transcript()),
            );
        }
        ChunkPhase::InFlight => {
            let progress = tally.progress();
            view.status = JobState::ChunkProcessing;
            view.progress = progress;
            view.message = Some(format!(
                "Processing chunks: {}/{} completed. Progress: {progress:.1}%. Current chunk statuses: {}",
                tally.counts.done,
                tally.counts.total,
                tally.pending.join(", ")
            ));
            view.transcript = non_empty(tally.transcript());
        }
    }

    view
}
