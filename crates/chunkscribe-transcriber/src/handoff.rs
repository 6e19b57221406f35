//! Most-recent completed transcript, read by the summarization consumer

use crate::error::TranscriptionResult;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Single most-recent-result slot, overwritten on every completion
#[async_trait]
pub trait TranscriptHandoff: Send + Sync {
    /// Replace the slot with a newly completed transcript
    async fn publish(&self, transcript: &str) -> TranscriptionResult<()>;

    /// Current slot contents
    fn latest(&self) -> Option<String>;
}

/// In-memory slot
#[derive(Debug, Default)]
pub struct LatestTranscriptSlot {
    slot: ArcSwapOption<String>,
}

impl LatestTranscriptSlot {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, transcript: &str) {
        self.slot.store(Some(Arc::new(transcript.to_string())));
    }
}

#[async_trait]
impl TranscriptHandoff for LatestTranscriptSlot {
    async fn publish(&self, transcript: &str) -> TranscriptionResult<()> {
        self.store(transcript);
        Ok(())
    }

    fn latest(&self) -> Option<String> {
        self.slot.load_full().map(|transcript| transcript.as_ref().clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HandoffDocument {
    transcript: String,
}

/// Slot persisted as `{"transcript": ...}` in a JSON file
///
/// Publishes are serialized so the file and the in-memory slot always hold
/// the same transcript.
#[derive(Debug)]
pub struct JsonFileHandoff {
    path: PathBuf,
    slot: LatestTranscriptSlot,
    write_lock: Mutex<()>,
}

impl JsonFileHandoff {
    /// Handoff writing to `path`; an existing file seeds the slot
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let slot = LatestTranscriptSlot::new();
        if let Some(existing) = read_document(&path) {
            slot.store(&existing);
        }
        Self {
            path,
            slot,
            write_lock: Mutex::new(()),
        }
    }

    /// File the transcript is written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(
                || "transcript".to_string(),
                |name| name.to_string_lossy().into_owned(),
            );
        self.path
            .with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()))
    }
}

async fn write_and_rename(staging: &Path, target: &Path, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(staging, body).await?;
    tokio::fs::rename(staging, target).await
}

fn read_document(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<HandoffDocument>(&raw)
        .ok()
        .map(|doc| doc.transcript)
}

#[async_trait]
impl TranscriptHandoff for JsonFileHandoff {
    async fn publish(&self, transcript: &str) -> TranscriptionResult<()> {
        let document = HandoffDocument {
            transcript: transcript.to_string(),
        };
        let body = serde_json::to_vec(&document)?;

        let _guard = self.write_lock.lock().await;

        // Write beside the target and rename so readers never see a partial file
        let staging = self.staging_path();
        if let Err(e) = write_and_rename(&staging, &self.path, &body).await {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!("Failed to remove {}: {cleanup}", staging.display());
            }
            return Err(e.into());
        }

        self.slot.store(transcript);
        info!("Saved latest transcript to {}", self.path.display());
        Ok(())
    }

    fn latest(&self) -> Option<String> {
        self.slot.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_slot_overwrites() {
        let slot = LatestTranscriptSlot::new();
        assert!(slot.latest().is_none());

        slot.publish("first").await.unwrap();
        slot.publish("second").await.unwrap();
        assert_eq!(slot.latest().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_json_file_handoff_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_transcript.json");
        let handoff = JsonFileHandoff::new(&path);
        assert!(handoff.latest().is_none());

        handoff.publish("a b c").await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"transcript": "a b c"}));
        assert_eq!(handoff.latest().as_deref(), Some("a b c"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_keep_file_and_slot_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_transcript.json");
        let handoff = JsonFileHandoff::new(&path);

        let long = "word ".repeat(40_000);
        for _ in 0..100 {
            let (a, b) = tokio::join!(handoff.publish(&long), handoff.publish("short one"));
            a.unwrap();
            b.unwrap();

            assert_eq!(read_document(&path), handoff.latest());
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_json_file_handoff_reloads_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_transcript.json");
        JsonFileHandoff::new(&path).publish("earlier run").await.unwrap();

        let reopened = JsonFileHandoff::new(&path);
        assert_eq!(reopened.latest().as_deref(), Some("earlier run"));
    }
}
