//! Job orchestration core for long-form audio transcription
//!
//! Uploaded audio is probed and routed to a single-pass or a chunked path.
//! Chunked jobs are cut into fixed-length windows that are transcribed by a
//! bounded pool of workers, and every status poll merges the chunk records
//! into one job-level view with a live partial transcript.
//!
//! External systems (ffprobe/ffmpeg, blob storage, the speech provider and
//! the transcript handoff) sit behind traits; [`mock`] provides scripted
//! implementations of each.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::significant_drop_tightening,
    clippy::float_cmp,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::future_not_send
)]

pub mod aggregate;
pub mod blob;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handoff;
pub mod mock;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod provider;
pub mod store;
pub mod transcode;
pub mod types;
pub mod worker;

pub use error::{ErrorKind, TranscriptionError, TranscriptionResult};
pub use orchestrator::{Collaborators, Orchestrator};
pub use store::JobStore;
pub use types::{
    ChunkCounts, ChunkState, ChunkTask, Job, JobId, JobKind, JobState, JobStatusView, JobTicket,
    RecognitionOptions, TimeWindow,
};

// Re-export the shipped collaborator implementations
pub use blob::{BlobStore, GcsBlobStore};
pub use handoff::{JsonFileHandoff, LatestTranscriptSlot, TranscriptHandoff};
pub use probe::{DurationProbe, MediaProbe};
pub use provider::{GoogleSpeechProvider, SpeechProvider};
pub use transcode::{FfmpegTranscoder, Transcoder};
