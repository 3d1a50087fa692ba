//! Transcript rendering.

use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use murmur_core::TranscriptionResult;

/// How to print the finished transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain joined text
    Text,
    /// The canonical transcript model as JSON
    Json,
    /// SubRip subtitles
    Srt,
    /// WebVTT subtitles
    Vtt,
}

/// Writes the transcript in the requested format.
pub fn render(
    result: &TranscriptionResult,
    format: OutputFormat,
    mut out: impl Write,
) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", result.text())?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, result)?;
            writeln!(out)?;
        }
        OutputFormat::Srt => write_srt(result, &mut out)?,
        OutputFormat::Vtt => write_vtt(result, &mut out)?,
    }
    Ok(())
}

fn write_srt(result: &TranscriptionResult, out: &mut impl Write) -> Result<()> {
    for (index, segment) in result.segments.iter().enumerate() {
        writeln!(out, "{}", index + 1)?;
        writeln!(
            out,
            "{} --> {}",
            format_timestamp(segment.start, ','),
            format_timestamp(segment.end, ',')
        )?;
        writeln!(out, "{}", segment.text)?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_vtt(result: &TranscriptionResult, out: &mut impl Write) -> Result<()> {
    writeln!(out, "WEBVTT")?;
    writeln!(out)?;
    for segment in &result.segments {
        writeln!(
            out,
            "{} --> {}",
            format_timestamp(segment.start, '.'),
            format_timestamp(segment.end, '.')
        )?;
        writeln!(out, "{}", segment.text)?;
        writeln!(out)?;
    }
    Ok(())
}

/// `HH:MM:SS,mmm` for SRT, `HH:MM:SS.mmm` for VTT.
fn format_timestamp(seconds: f64, millis_sep: char) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}{millis_sep}{millis:03}")
}
