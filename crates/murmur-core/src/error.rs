//! Classified transcription errors.
//!
//! Every failure carries a kind, a technical message for logs, and a
//! user-facing message (a per-kind default, overridable per instance).
//! There are no automatic retries anywhere in murmur; the kind gives the
//! caller enough to decide whether retrying with a smaller model or a
//! different engine makes sense.

use thiserror::Error;

/// How many bytes of stderr to keep when classification falls through to
/// `Unknown`.
const STDERR_TAIL_BYTES: usize = 600;

/// The fixed set of failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No supported engine was found on this system.
    NotInstalled,
    /// The engine could not load the requested model.
    ModelNotFound,
    /// The input file does not exist.
    AudioNotFound,
    /// The input file exists but is not a supported or decodable media file.
    InvalidAudio,
    /// The caller cancelled the run.
    Cancelled,
    /// The host-side timeout budget expired.
    Timeout,
    /// The engine ran out of memory.
    OutOfMemory,
    /// Anything else, with truncated stderr attached.
    Unknown,
}

impl ErrorKind {
    /// The default user-facing message for this kind.
    pub fn default_user_message(&self) -> &'static str {
        match self {
            Self::NotInstalled => {
                "No speech-recognition engine found. Install faster-whisper, \
                 whisper.cpp, or openai-whisper and try again."
            }
            Self::ModelNotFound => {
                "The selected model is not available. Pick a smaller model or \
                 let the engine download it first."
            }
            Self::AudioNotFound => "The media file could not be found.",
            Self::InvalidAudio => "This file is not a supported audio or video format.",
            Self::Cancelled => "Transcription was cancelled.",
            Self::Timeout => {
                "Transcription took too long and was stopped. Try a smaller model."
            }
            Self::OutOfMemory => {
                "The engine ran out of memory. Try a smaller model."
            }
            Self::Unknown => "Transcription failed unexpectedly.",
        }
    }

    /// Classifies engine stderr into an error kind.
    ///
    /// Scans case-insensitively for known failure substrings. Order matters:
    /// memory failures often also mention the model, so they are checked
    /// first.
    pub fn classify_stderr(stderr: &str) -> Self {
        let text = stderr.to_lowercase();
        if text.contains("out of memory") {
            return Self::OutOfMemory;
        }
        if text.contains("model") && (text.contains("not found") || text.contains("does not exist"))
        {
            return Self::ModelNotFound;
        }
        if text.contains("timeout") {
            return Self::Timeout;
        }
        if text.contains("invalid") || text.contains("unsupported") || text.contains("cannot decode")
        {
            return Self::InvalidAudio;
        }
        Self::Unknown
    }
}

/// A classified transcription failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TranscribeError {
    kind: ErrorKind,
    message: String,
    user_message: Option<String>,
}

impl TranscribeError {
    /// Creates an error with the given kind and technical message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: None,
        }
    }

    /// Overrides the default user-facing message.
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Classifies a non-clean engine exit from its stderr text.
    ///
    /// `Unknown` results carry the stderr tail in the technical message so
    /// logs stay useful without ballooning.
    pub fn from_engine_stderr(exit_code: Option<i32>, stderr: &str) -> Self {
        let kind = ErrorKind::classify_stderr(stderr);
        let tail = stderr_tail(stderr);
        let code = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Self::new(
            kind,
            format!("engine exited with code {code}: {tail}"),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The technical message, for logs.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The user-facing message: the per-instance override when set, else
    /// the kind's default.
    pub fn user_message(&self) -> &str {
        self.user_message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_user_message())
    }

    pub fn not_installed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInstalled, message)
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelNotFound, message)
    }

    pub fn audio_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AudioNotFound, message)
    }

    pub fn invalid_audio(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAudio, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

/// Last `STDERR_TAIL_BYTES` of stderr, on a char boundary.
fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_out_of_memory() {
        assert_eq!(
            ErrorKind::classify_stderr("RuntimeError: CUDA out of memory"),
            ErrorKind::OutOfMemory
        );
        assert_eq!(
            ErrorKind::classify_stderr("Killed: process ran Out Of Memory"),
            ErrorKind::OutOfMemory
        );
    }

    #[test]
    fn test_classify_model_not_found() {
        assert_eq!(
            ErrorKind::classify_stderr("error: model file 'ggml-huge.bin' not found"),
            ErrorKind::ModelNotFound
        );
        assert_eq!(
            ErrorKind::classify_stderr("Model path does not exist"),
            ErrorKind::ModelNotFound
        );
        // "not found" without a model mention is not a model failure
        assert_eq!(
            ErrorKind::classify_stderr("command not found"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_classify_invalid_audio() {
        assert_eq!(
            ErrorKind::classify_stderr("ffmpeg: cannot decode stream"),
            ErrorKind::InvalidAudio
        );
        assert_eq!(
            ErrorKind::classify_stderr("Unsupported sample format"),
            ErrorKind::InvalidAudio
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(
            ErrorKind::classify_stderr("segmentation fault"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_memory_wins_over_model() {
        // OOM messages frequently name the model; they must still classify
        // as OutOfMemory.
        assert_eq!(
            ErrorKind::classify_stderr("loading model large-v3: out of memory"),
            ErrorKind::OutOfMemory
        );
    }

    #[test]
    fn test_user_message_override() {
        let err = TranscribeError::timeout("budget of 600s expired");
        assert_eq!(
            err.user_message(),
            ErrorKind::Timeout.default_user_message()
        );

        let err = err.with_user_message("Took too long for this podcast.");
        assert_eq!(err.user_message(), "Took too long for this podcast.");
        assert_eq!(err.message(), "budget of 600s expired");
    }

    #[test]
    fn test_from_engine_stderr_truncates() {
        let long = "x".repeat(5000) + " invalid data found";
        let err = TranscribeError::from_engine_stderr(Some(1), &long);
        assert_eq!(err.kind(), ErrorKind::InvalidAudio);
        assert!(err.message().len() < 700);
        assert!(err.message().contains("exited with code 1"));
    }
}
