//! Result-file normalization.
//!
//! The engines write three different JSON shapes. This module folds any of
//! them into the canonical transcript model, preferring a partially-timed
//! transcript over a hard failure: unreadable timing falls back to zero,
//! words missing timing inherit their parent segment's span.

use murmur_core::{
    ModelSize, TranscribeError, TranscriptionResult, TranscriptionSegment, TranscriptionWord,
};
use serde_json::Value;

/// Top-level field names that may hold the segment array, in priority
/// order.
const SEGMENT_ARRAY_FIELDS: &[&str] = &["segments", "transcription", "results"];

/// Language when no engine field carries one.
const DEFAULT_LANGUAGE: &str = "en";

/// Parses an engine result file into the canonical transcript.
pub fn normalize_output(
    json_text: &str,
    model: ModelSize,
    processing_time_ms: u64,
) -> Result<TranscriptionResult, TranscribeError> {
    let root: Value = serde_json::from_str(json_text)
        .map_err(|e| TranscribeError::unknown(format!("result file is not valid JSON: {e}")))?;

    let raw_segments = SEGMENT_ARRAY_FIELDS
        .iter()
        .find_map(|field| root.get(field).and_then(Value::as_array))
        .ok_or_else(|| {
            TranscribeError::unknown("result file has no recognizable segment array")
        })?;

    let segments: Vec<TranscriptionSegment> = raw_segments
        .iter()
        .enumerate()
        .map(|(index, raw)| normalize_segment(raw, index))
        .collect();

    let language = detect_language(&root);
    let duration = segments
        .last()
        .map(|s| s.end)
        .filter(|end| *end > 0.0)
        .or_else(|| root.get("duration").and_then(Value::as_f64))
        .unwrap_or(0.0);
    let has_word_timestamps = segments
        .iter()
        .any(|s| s.words.as_ref().is_some_and(|w| !w.is_empty()));

    Ok(TranscriptionResult {
        segments,
        language,
        duration,
        processing_time_ms,
        model,
        has_word_timestamps,
    })
}

fn normalize_segment(raw: &Value, index: usize) -> TranscriptionSegment {
    let (start, end) = segment_span(raw).unwrap_or((0.0, 0.0));
    let text = raw
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let id = raw
        .get("id")
        .and_then(Value::as_u64)
        .unwrap_or(index as u64) as u32;

    let words = raw.get("words").and_then(Value::as_array).map(|raw_words| {
        raw_words
            .iter()
            .filter_map(|w| normalize_word(w, start, end))
            .collect::<Vec<_>>()
    });

    TranscriptionSegment {
        id,
        start,
        end,
        text,
        words: words.filter(|w| !w.is_empty()),
    }
}

/// Extracts a segment's time span, trying each encoding scheme in priority
/// order: plain seconds, millisecond offsets, formatted timestamp strings.
fn segment_span(raw: &Value) -> Option<(f64, f64)> {
    if let (Some(start), Some(end)) = (
        raw.get("start").and_then(Value::as_f64),
        raw.get("end").and_then(Value::as_f64),
    ) {
        return Some((start, end));
    }

    if let Some(offsets) = raw.get("offsets") {
        if let (Some(from), Some(to)) = (
            offsets.get("from").and_then(Value::as_f64),
            offsets.get("to").and_then(Value::as_f64),
        ) {
            return Some((from / 1000.0, to / 1000.0));
        }
    }

    if let Some(timestamps) = raw.get("timestamps") {
        if let (Some(from), Some(to)) = (
            timestamps.get("from").and_then(Value::as_str),
            timestamps.get("to").and_then(Value::as_str),
        ) {
            if let (Some(start), Some(end)) = (parse_timestamp(from), parse_timestamp(to)) {
                return Some((start, end));
            }
        }
    }

    None
}

/// A word missing timing inherits the parent segment's span rather than
/// being dropped.
fn normalize_word(raw: &Value, segment_start: f64, segment_end: f64) -> Option<TranscriptionWord> {
    let word = raw.get("word").and_then(Value::as_str)?.to_string();
    let (start, end) = match (
        raw.get("start").and_then(Value::as_f64),
        raw.get("end").and_then(Value::as_f64),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => (segment_start, segment_end),
    };
    let probability = raw
        .get("probability")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);

    Some(TranscriptionWord {
        word,
        start,
        end,
        probability,
    })
}

/// Reads the detected language from whichever location the engine used.
fn detect_language(root: &Value) -> String {
    root.get("language")
        .and_then(Value::as_str)
        .or_else(|| {
            root.get("result")
                .and_then(|r| r.get("language"))
                .and_then(Value::as_str)
        })
        .or_else(|| {
            root.get("params")
                .and_then(|p| p.get("language"))
                .and_then(Value::as_str)
        })
        .filter(|lang| !lang.is_empty() && *lang != "auto")
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string()
}

/// Parses `HH:MM:SS,mmm` (or `.mmm`) into seconds.
fn parse_timestamp(text: &str) -> Option<f64> {
    let mut parts = text.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let (seconds, millis) = match rest.split_once([',', '.']) {
        Some((s, ms)) => (
            s.parse::<f64>().ok()?,
            ms.parse::<f64>().ok()? / 10f64.powi(ms.len() as i32),
        ),
        None => (rest.parse::<f64>().ok()?, 0.0),
    };
    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis)
}
