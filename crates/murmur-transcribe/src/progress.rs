//! Incremental progress parsing over engine output.
//!
//! The three engines narrate progress in incompatible ways: per-segment
//! timestamp ranges, `progress = N%` lines, tqdm-style bars, and free-text
//! phase markers. This parser scans each output chunk for the first
//! notation that matches and folds everything into one monotonically
//! non-decreasing percentage with a human status string.

use std::sync::LazyLock;

use regex::Regex;

/// Fixed percentage for the model-loading phase.
const MODEL_LOAD_PERCENT: u8 = 5;

/// Floor once transcription output starts, absent any numeric signal.
const TRANSCRIBE_FLOOR_PERCENT: u8 = 10;

/// Segment timestamps map into 10..=99; 0..10 is reserved for model
/// loading.
const SEGMENT_BAND_START: u8 = 10;

/// Numeric progress is capped here until the orchestrator confirms the
/// result file exists and parses; a parser misfire can never claim
/// completion.
const PERCENT_CEILING: u8 = 99;

/// Bracketed per-segment ranges: `[01:02:03.450 --> 01:02:07.000]` with an
/// optional hour field (`[00:30.000 --> 01:00.000]`).
static SEGMENT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[(?:(\d{1,2}):)?(\d{1,2}):(\d{2})(?:[.,](\d{1,3}))?\s*-->\s*(?:(\d{1,2}):)?(\d{1,2}):(\d{2})(?:[.,](\d{1,3}))?\]",
    )
    .expect("valid regex")
});

/// `progress = 42%`
static EXPLICIT_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"progress\s*=\s*(\d{1,3})%").expect("valid regex"));

/// `42%|████      |` tqdm-style bars.
static BAR_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})%\|").expect("valid regex"));

/// A single progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// 0..=100; 100 only ever comes from [`ProgressUpdate::complete`].
    pub percent: u8,
    pub status: String,
}

impl ProgressUpdate {
    /// The terminal event, emitted by the orchestrator once the result file
    /// has been read and parsed. The parser itself never produces it.
    pub fn complete() -> Self {
        Self {
            percent: 100,
            status: "Transcription complete".to_string(),
        }
    }
}

/// Stateful scanner over process output chunks.
///
/// The only state is the highest percentage reported so far; reported
/// percentages never decrease across one run.
#[derive(Debug, Default)]
pub struct ProgressParser {
    highest: u8,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans one output chunk. Returns a report only when it advances past
    /// everything previously reported.
    ///
    /// `total_duration` (seconds) maps segment timestamps into the 10..=99
    /// band; pass 0 when unknown.
    pub fn parse(&mut self, chunk: &str, total_duration: f64) -> Option<ProgressUpdate> {
        let candidate = self
            .match_segment_range(chunk, total_duration)
            .or_else(|| Self::match_explicit_percent(chunk))
            .or_else(|| Self::match_bar_percent(chunk))
            .or_else(|| Self::match_phase_marker(chunk))?;

        if candidate.percent <= self.highest {
            return None;
        }
        self.highest = candidate.percent;
        Some(candidate)
    }

    /// Highest percentage reported so far.
    pub fn highest(&self) -> u8 {
        self.highest
    }

    fn match_segment_range(&self, chunk: &str, total_duration: f64) -> Option<ProgressUpdate> {
        // A chunk can carry many segment lines; the furthest end position
        // wins.
        let end = SEGMENT_RANGE
            .captures_iter(chunk)
            .map(|caps| {
                let hours: f64 = caps.get(5).map_or(0.0, |m| m.as_str().parse().unwrap_or(0.0));
                let minutes: f64 = caps[6].parse().unwrap_or(0.0);
                let seconds: f64 = caps[7].parse().unwrap_or(0.0);
                let millis: f64 = caps
                    .get(8)
                    .map_or(0.0, |m| pad_millis(m.as_str()) as f64 / 1000.0);
                hours * 3600.0 + minutes * 60.0 + seconds + millis
            })
            .fold(None, |acc: Option<f64>, end| {
                Some(acc.map_or(end, |a| a.max(end)))
            })?;

        if total_duration <= 0.0 {
            // Segments are flowing but we cannot place them; report the
            // transcription floor.
            return Some(ProgressUpdate {
                percent: TRANSCRIBE_FLOOR_PERCENT,
                status: "Transcribing".to_string(),
            });
        }

        let fraction = (end / total_duration).clamp(0.0, 1.0);
        let band = f64::from(PERCENT_CEILING - SEGMENT_BAND_START);
        let percent = SEGMENT_BAND_START + (fraction * band).round() as u8;
        Some(ProgressUpdate {
            percent: percent.min(PERCENT_CEILING),
            status: format!("Transcribing ({:.0}s of {:.0}s)", end, total_duration),
        })
    }

    fn match_explicit_percent(chunk: &str) -> Option<ProgressUpdate> {
        let percent = EXPLICIT_PERCENT
            .captures_iter(chunk)
            .filter_map(|caps| caps[1].parse::<u8>().ok())
            .max()?;
        Some(Self::numeric_update(percent))
    }

    fn match_bar_percent(chunk: &str) -> Option<ProgressUpdate> {
        let percent = BAR_PERCENT
            .captures_iter(chunk)
            .filter_map(|caps| caps[1].parse::<u8>().ok())
            .max()?;
        Some(Self::numeric_update(percent))
    }

    fn numeric_update(percent: u8) -> ProgressUpdate {
        let percent = percent.min(PERCENT_CEILING);
        ProgressUpdate {
            percent,
            status: format!("Transcribing ({percent}%)"),
        }
    }

    fn match_phase_marker(chunk: &str) -> Option<ProgressUpdate> {
        let text = chunk.to_lowercase();
        // Engines phrase this differently ("Loading model...", "Loading
        // medium model on cpu..."); loading + model together is the signal.
        if text.contains("loading") && text.contains("model") {
            return Some(ProgressUpdate {
                percent: MODEL_LOAD_PERCENT,
                status: "Loading model".to_string(),
            });
        }
        if text.contains("transcribing") || text.contains("processing") {
            return Some(ProgressUpdate {
                percent: TRANSCRIBE_FLOOR_PERCENT,
                status: "Transcribing".to_string(),
            });
        }
        None
    }
}

/// `"5"` in a timestamp means 500 ms, not 5 ms.
fn pad_millis(digits: &str) -> u32 {
    let value: u32 = digits.parse().unwrap_or(0);
    match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_range_with_hours() {
        let mut parser = ProgressParser::new();
        let update = parser
            .parse("[00:10:00.000 --> 00:20:00.000]  some words", 2400.0)
            .unwrap();
        // 1200s of 2400s: halfway through the 10..=99 band.
        assert_eq!(update.percent, 10 + 45);
    }

    #[test]
    fn test_segment_range_without_hours() {
        let mut parser = ProgressParser::new();
        let update = parser
            .parse("[00:30.000 --> 01:00.000] hello", 120.0)
            .unwrap();
        // 60s of 120s.
        assert_eq!(update.percent, 10 + 45);
    }

    #[test]
    fn test_segment_at_end_caps_at_99() {
        let mut parser = ProgressParser::new();
        let update = parser
            .parse("[00:59:00.000 --> 01:00:00.000] done soon", 3600.0)
            .unwrap();
        assert_eq!(update.percent, 99);
    }

    #[test]
    fn test_segment_without_known_duration_reports_floor() {
        let mut parser = ProgressParser::new();
        let update = parser.parse("[00:30.000 --> 01:00.000] hello", 0.0).unwrap();
        assert_eq!(update.percent, 10);
    }

    #[test]
    fn test_explicit_percent() {
        let mut parser = ProgressParser::new();
        let update = parser.parse("progress = 42%", 0.0).unwrap();
        assert_eq!(update.percent, 42);
    }

    #[test]
    fn test_bar_percent() {
        let mut parser = ProgressParser::new();
        let update = parser.parse("37%|████████      | 12/32", 0.0).unwrap();
        assert_eq!(update.percent, 37);
    }

    #[test]
    fn test_phase_markers() {
        let mut parser = ProgressParser::new();
        let update = parser
            .parse("Loading medium model on cpu (compute_type: int8)...", 0.0)
            .unwrap();
        assert_eq!(update.percent, 5);
        assert_eq!(update.status, "Loading model");

        let update = parser.parse("Transcribing: /tmp/clip.wav", 0.0).unwrap();
        assert_eq!(update.percent, 10);
    }

    #[test]
    fn test_monotonic_and_capped() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.parse("progress = 50%", 0.0).unwrap().percent, 50);
        // Lower and equal reports are suppressed.
        assert!(parser.parse("progress = 30%", 0.0).is_none());
        assert!(parser.parse("progress = 50%", 0.0).is_none());
        // 100% from the engine is capped below completion.
        assert_eq!(parser.parse("progress = 100%", 0.0).unwrap().percent, 99);
        assert!(parser.parse("progress = 100%", 0.0).is_none());
    }

    #[test]
    fn test_mixed_stream_never_decreases() {
        let chunks = [
            "Loading base model on cpu...",
            "Transcribing: clip.wav",
            "[00:00.000 --> 00:10.000] first",
            "progress = 20%",
            "[00:20.000 --> 00:30.000] later",
            "5%|█",
            "progress = 80%",
            "[00:50.000 --> 01:00.000] end",
            "progress = 100%",
        ];
        let mut parser = ProgressParser::new();
        let mut last = 0;
        for chunk in chunks {
            if let Some(update) = parser.parse(chunk, 60.0) {
                assert!(update.percent > last, "decreased at {chunk:?}");
                assert!(update.percent <= 99);
                last = update.percent;
            }
        }
        assert_eq!(last, 99);
    }

    #[test]
    fn test_multiple_ranges_in_one_chunk_take_furthest() {
        let mut parser = ProgressParser::new();
        let chunk = "[00:00.000 --> 00:10.000] a\n[00:10.000 --> 00:30.000] b";
        let update = parser.parse(chunk, 60.0).unwrap();
        // End of the second range, 30s of 60s.
        assert_eq!(update.percent, 10 + 45);
    }

    #[test]
    fn test_unrelated_output_is_ignored() {
        let mut parser = ProgressParser::new();
        assert!(parser.parse("warning: experimental flag", 60.0).is_none());
        assert_eq!(parser.highest(), 0);
    }
}
