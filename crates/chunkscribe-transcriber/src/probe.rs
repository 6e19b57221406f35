//! Media duration probing with a primary and a fallback strategy

use crate::error::{TranscriptionError, TranscriptionResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Determines the duration of an audio asset
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds; `0.0` means the duration could not be determined
    async fn probe_duration(&self, path: &Path) -> f64;
}

/// One way of reading a duration
#[async_trait]
pub trait ProbeStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &str;

    /// Duration in seconds, `None` when the tool reported no usable value
    async fn duration(&self, path: &Path) -> TranscriptionResult<Option<f64>>;
}

/// Probe that tries a primary strategy and falls back to a secondary one
pub struct MediaProbe {
    primary: Box<dyn ProbeStrategy>,
    secondary: Box<dyn ProbeStrategy>,
}

impl std::fmt::Debug for MediaProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaProbe")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

impl MediaProbe {
    /// Combine two strategies
    pub fn new(primary: Box<dyn ProbeStrategy>, secondary: Box<dyn ProbeStrategy>) -> Self {
        Self { primary, secondary }
    }

    /// Container metadata first, then the plain `format=duration` entry
    pub fn ffprobe(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        Self::new(
            Box::new(FfprobeMetadata::new(binary.clone())),
            Box::new(FfprobeDurationEntry::new(binary)),
        )
    }

    async fn attempt(strategy: &dyn ProbeStrategy, path: &Path) -> Option<f64> {
        match strategy.duration(path).await {
            Ok(Some(duration)) if duration.is_finite() && duration > 0.0 => {
                info!(
                    "{} detected duration for {}: {duration}s",
                    strategy.name(),
                    path.display()
                );
                Some(duration)
            }
            Ok(other) => {
                warn!(
                    "{} returned no usable duration ({other:?}) for {}",
                    strategy.name(),
                    path.display()
                );
                None
            }
            Err(e) => {
                warn!("{} failed for {}: {e}", strategy.name(), path.display());
                None
            }
        }
    }
}

#[async_trait]
impl DurationProbe for MediaProbe {
    async fn probe_duration(&self, path: &Path) -> f64 {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!("probe_duration: file not found at {}", path.display());
            return 0.0;
        }

        if let Some(duration) = Self::attempt(self.primary.as_ref(), path).await {
            return duration;
        }
        Self::attempt(self.secondary.as_ref(), path)
            .await
            .unwrap_or(0.0)
    }
}

async fn run_ffprobe(binary: &str, args: &[&str], path: &Path) -> TranscriptionResult<String> {
    debug!("Running {binary} {} {}", args.join(" "), path.display());

    let output = Command::new(binary)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TranscriptionError::configuration(format!(
                    "{binary} not found; install FFmpeg and make sure it is on PATH"
                ))
            } else {
                TranscriptionError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(TranscriptionError::transcode_failure(format!(
            "{binary} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Reads `format.duration` from ffprobe's JSON container metadata
#[derive(Debug, Clone)]
pub struct FfprobeMetadata {
    binary: String,
}

impl FfprobeMetadata {
    /// Use the given ffprobe binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Extract the duration from ffprobe `-print_format json -show_format` output
pub fn parse_metadata_duration(json: &str) -> TranscriptionResult<Option<f64>> {
    let output: ProbeOutput = serde_json::from_str(json)?;
    Ok(output
        .format
        .and_then(|format| format.duration)
        .and_then(|duration| duration.trim().parse::<f64>().ok()))
}

#[async_trait]
impl ProbeStrategy for FfprobeMetadata {
    fn name(&self) -> &str {
        "ffprobe metadata"
    }

    async fn duration(&self, path: &Path) -> TranscriptionResult<Option<f64>> {
        let stdout = run_ffprobe(
            &self.binary,
            &["-v", "quiet", "-print_format", "json", "-show_format"],
            path,
        )
        .await?;
        parse_metadata_duration(&stdout)
    }
}

/// Reads the bare `format=duration` entry from ffprobe
#[derive(Debug, Clone)]
pub struct FfprobeDurationEntry {
    binary: String,
}

impl FfprobeDurationEntry {
    /// Use the given ffprobe binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Parse ffprobe's bare duration output; `N/A` and empty output are `None`
pub fn parse_duration_entry(stdout: &str) -> Option<f64> {
    let value = stdout.trim();
    if value.is_empty() || value == "N/A" {
        return None;
    }
    value.parse().ok()
}

#[async_trait]
impl ProbeStrategy for FfprobeDurationEntry {
    fn name(&self) -> &str {
        "ffprobe duration entry"
    }

    async fn duration(&self, path: &Path) -> TranscriptionResult<Option<f64>> {
        let stdout = run_ffprobe(
            &self.binary,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
        )
        .await?;
        Ok(parse_duration_entry(&stdout))
    }
}
