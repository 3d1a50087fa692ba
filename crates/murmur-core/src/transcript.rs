//! Canonical transcript model.
//!
//! Every engine's result file is normalized into these types exactly once,
//! at successful completion. All times are seconds from the start of the
//! media.

use serde::{Deserialize, Serialize};

use crate::ModelSize;

/// A single word with timing, when the engine produced word-level output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Engine-reported confidence in 0..=1; 1.0 when the engine omits it.
    pub probability: f64,
}

/// A contiguous transcribed span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<TranscriptionWord>>,
}

/// The result of one completed transcription.
///
/// Segments keep the order the engine emitted them; ascending start time is
/// expected but not re-sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<TranscriptionSegment>,
    /// Detected (or requested) language code.
    pub language: String,
    /// Media duration in seconds: last segment end when available, falling
    /// back to an engine-reported duration field, else 0.
    pub duration: f64,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    pub model: ModelSize,
    /// True iff at least one segment carries a non-empty word list.
    pub has_word_timestamps: bool,
}

impl TranscriptionResult {
    /// Joins all segment texts into one plain-text transcript.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
