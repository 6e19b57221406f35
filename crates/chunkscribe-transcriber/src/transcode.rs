//! Transcoding and window cutting through an external tool

use crate::error::{TranscriptionError, TranscriptionResult};
use crate::types::{AudioEncoding, TimeWindow};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Bitrate of transcoded live captures
pub const CAPTURE_BITRATE: &str = "32k";

/// FLAC compression level for uploaded files and chunks
pub const FLAC_COMPRESSION_LEVEL: u8 = 5;

/// One transcoding job for the external tool
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    /// Source file
    pub input: PathBuf,
    /// Destination file, overwritten if present
    pub output: PathBuf,
    /// Target encoding
    pub encoding: AudioEncoding,
    /// Target sample rate; output is always mono
    pub sample_rate_hertz: u32,
    /// Cut only this window of the source
    pub window: Option<TimeWindow>,
}

/// Converts audio into the provider's format
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Produce `request.output` from `request.input`
    async fn transcode(&self, request: &TranscodeRequest) -> TranscriptionResult<()>;
}

/// Build the ffmpeg argument list for a request
pub fn ffmpeg_args(request: &TranscodeRequest) -> Vec<String> {
    let mut args = vec!["-i".to_string(), request.input.display().to_string()];

    if let Some(window) = request.window {
        args.extend([
            "-ss".to_string(),
            format_seconds(window.start),
            "-t".to_string(),
            format_seconds(window.length()),
        ]);
    }

    let rate = request.sample_rate_hertz.to_string();
    match request.encoding {
        AudioEncoding::Flac => args.extend([
            "-ar".to_string(),
            rate,
            "-ac".to_string(),
            "1".to_string(),
            "-c:a".to_string(),
            "flac".to_string(),
            "-compression_level".to_string(),
            FLAC_COMPRESSION_LEVEL.to_string(),
        ]),
        AudioEncoding::Mp3 => args.extend([
            "-vn".to_string(),
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-ar".to_string(),
            rate,
            "-ac".to_string(),
            "1".to_string(),
            "-b:a".to_string(),
            CAPTURE_BITRATE.to_string(),
        ]),
    }

    args.push(request.output.display().to_string());
    args.push("-y".to_string());
    args
}

fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{seconds:.0}")
    } else {
        format!("{seconds:.3}")
    }
}

/// Map ffmpeg's stderr to a transcode failure
fn describe_failure(status: std::process::ExitStatus, stderr: &str) -> TranscriptionError {
    if stderr.contains("Unknown encoder 'libmp3lame'") {
        return TranscriptionError::transcode_failure(
            "FFmpeg error: MP3 encoder (libmp3lame) not found",
        );
    }
    TranscriptionError::transcode_failure(format!("ffmpeg exited with {status}: {}", stderr.trim()))
}

/// Transcoder backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    /// Use the given ffmpeg binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> TranscriptionResult<()> {
        let args = ffmpeg_args(request);
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscriptionError::transcode_failure("FFmpeg not found. Please install it.")
                } else {
                    TranscriptionError::transcode_failure(format!("failed to start ffmpeg: {e}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "ffmpeg failed for {} ({}): {}",
                request.input.display(),
                output.status,
                stderr.trim()
            );
            return Err(describe_failure(output.status, &stderr));
        }

        let produced = tokio::fs::metadata(&request.output)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if produced == 0 {
            return Err(TranscriptionError::transcode_failure(format!(
                "conversion produced an empty or missing file: {}",
                request.output.display()
            )));
        }

        info!(
            "Converted {} to {} ({produced} bytes)",
            request.input.display(),
            request.output.display()
        );
        Ok(())
    }
}
