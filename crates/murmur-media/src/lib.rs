//! Media probing and audio extraction for murmur.
//!
//! Converts video containers into the mono 16 kHz WAV the engines consume,
//! and probes media duration. All external tool invocations go through the
//! process registry so they are covered by shutdown and cancellation.

mod extract;
mod format;
mod locate;

pub use extract::{ExtractedAudio, extract_wav, probe_duration};
pub use format::{MediaKind, media_kind, supported_extensions};
pub use locate::locate_tool;

use thiserror::Error;

/// Errors from media preparation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found on this system")]
    FfmpegNotFound,

    #[error("audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("audio extraction cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
