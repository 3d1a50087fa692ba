//! Audio extraction and duration probing via ffmpeg/ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_process::{ProcessCategory, ProcessRegistry};

use crate::{MediaError, locate_tool};

/// A temporary waveform extracted from a video container.
///
/// The backing directory is deleted when this guard drops, on every exit
/// path of the transcription call that owns it.
pub struct ExtractedAudio {
    path: PathBuf,
    _dir: TempDir,
}

impl ExtractedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Extracts a mono 16 kHz 16-bit PCM WAV from a media file.
///
/// The ffmpeg child is registered under `AudioExtraction` so shutdown
/// covers it; `cancel` additionally kills this one extraction and returns
/// `MediaError::Cancelled`.
pub async fn extract_wav(
    input: &Path,
    registry: &Arc<ProcessRegistry>,
    cancel: &CancellationToken,
) -> Result<ExtractedAudio, MediaError> {
    let ffmpeg = locate_tool("ffmpeg").ok_or(MediaError::FfmpegNotFound)?;

    let dir = TempDir::with_prefix("murmur-audio-")?;
    let out_path = dir.path().join("extracted.wav");

    info!(input = ?input, output = ?out_path, "Extracting audio track");

    let mut child = Command::new(&ffmpeg)
        .arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(&out_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
    let handle = registry.register(
        child,
        ProcessCategory::AudioExtraction,
        format!("ffmpeg extract {}", input.display()),
    );

    let id = handle.id();
    let mut stderr = String::new();
    // Drain stderr before waiting so a chatty ffmpeg can't fill the pipe
    // and deadlock against our wait.
    let status = tokio::select! {
        status = async {
            let _ = stderr_pipe.read_to_string(&mut stderr).await;
            handle.wait().await
        } => status?,
        _ = cancel.cancelled() => {
            registry.kill(id);
            return Err(MediaError::Cancelled);
        }
    };

    if !status.success() {
        return Err(MediaError::ExtractionFailed(stderr_tail(&stderr)));
    }
    if !out_path.is_file() {
        return Err(MediaError::ExtractionFailed(
            "ffmpeg exited cleanly but produced no output file".to_string(),
        ));
    }

    debug!(output = ?out_path, "Audio extraction complete");
    Ok(ExtractedAudio {
        path: out_path,
        _dir: dir,
    })
}

/// Probes media duration in seconds via ffprobe.
///
/// Returns `None` when ffprobe is unavailable or the file has no parseable
/// duration; callers treat that as "unknown", never as an error.
pub async fn probe_duration(input: &Path, registry: &Arc<ProcessRegistry>) -> Option<f64> {
    let ffprobe = locate_tool("ffprobe")?;

    let mut child = Command::new(&ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .ok()?;

    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let handle = registry.register(
        child,
        ProcessCategory::Other,
        format!("ffprobe {}", input.display()),
    );

    let mut stdout = String::new();
    let _ = stdout_pipe.read_to_string(&mut stdout).await;
    let status = handle.wait().await.ok()?;

    if !status.success() {
        warn!(input = ?input, "ffprobe failed, duration unknown");
        return None;
    }

    let duration = stdout.trim().parse::<f64>().ok()?;
    if duration.is_finite() && duration >= 0.0 {
        debug!(input = ?input, duration, "Probed media duration");
        Some(duration)
    } else {
        None
    }
}

fn stderr_tail(stderr: &str) -> String {
    const TAIL: usize = 400;
    let trimmed = stderr.trim();
    if trimmed.len() <= TAIL {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracted_audio_cleans_up_on_drop() {
        let dir = TempDir::with_prefix("murmur-audio-").unwrap();
        let path = dir.path().join("extracted.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let dir_path = dir.path().to_path_buf();
        let extracted = ExtractedAudio { path, _dir: dir };
        assert!(extracted.path().exists());

        drop(extracted);
        assert!(!dir_path.exists());
    }

    #[tokio::test]
    async fn test_probe_duration_missing_file() {
        // Whatever the ffprobe situation on this host, a nonexistent input
        // must come back as unknown, not an error.
        let registry = ProcessRegistry::new();
        let duration = probe_duration(Path::new("/nonexistent/clip.mp4"), &registry).await;
        assert!(duration.is_none());
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "a".repeat(1000) + "the actual error";
        let tail = stderr_tail(&long);
        assert!(tail.len() <= 400);
        assert!(tail.ends_with("the actual error"));
    }
}
