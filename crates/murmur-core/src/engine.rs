//! Engine variant and preference tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The supported speech-recognition engines.
///
/// Each variant is a distinct command-line tool with its own flag set,
/// progress notation, and result-file schema. All variant-specific behavior
/// lives behind one strategy per variant in `murmur-transcribe`; this tag is
/// what gets selected, stored, and passed around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineVariant {
    /// The `faster-whisper` CLI wrapper (CTranslate2 backend).
    FasterWhisper,
    /// whisper.cpp's `whisper-cli` (GGML backend).
    WhisperCpp,
    /// The original `openai-whisper` Python CLI.
    OpenAiWhisper,
}

impl EngineVariant {
    /// Returns the bare command name used for PATH lookups.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::FasterWhisper => "faster-whisper",
            Self::WhisperCpp => "whisper-cli",
            Self::OpenAiWhisper => "whisper",
        }
    }

    /// Returns the canonical config/display name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FasterWhisper => "faster-whisper",
            Self::WhisperCpp => "whisper-cpp",
            Self::OpenAiWhisper => "openai-whisper",
        }
    }

    /// Parses a variant name (case-insensitive, accepts common aliases).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "faster-whisper" | "faster_whisper" | "faster" => Some(Self::FasterWhisper),
            "whisper-cpp" | "whisper.cpp" | "whisper-cli" | "cpp" => Some(Self::WhisperCpp),
            "openai-whisper" | "openai_whisper" | "openai" | "whisper" => Some(Self::OpenAiWhisper),
            _ => None,
        }
    }

    /// All variants, in no particular order. Detection ordering is decided
    /// by the detector based on host platform.
    pub fn all() -> [Self; 3] {
        [Self::FasterWhisper, Self::WhisperCpp, Self::OpenAiWhisper]
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which engine a caller wants the detector to find.
///
/// `Auto` and `Only(..)` are distinct cache keys: a cached auto-detection is
/// never served to a caller that asked for a specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnginePreference {
    /// Try all variants in platform order.
    #[default]
    Auto,
    /// Only accept this variant.
    Only(EngineVariant),
}

impl EnginePreference {
    /// Parses `"auto"` or any variant name.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("auto") {
            return Some(Self::Auto);
        }
        EngineVariant::from_name(name).map(Self::Only)
    }

    /// Returns the requested variant, if the preference is explicit.
    pub fn variant(&self) -> Option<EngineVariant> {
        match self {
            Self::Auto => None,
            Self::Only(v) => Some(*v),
        }
    }
}

impl fmt::Display for EnginePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Only(v) => f.write_str(v.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_from_name() {
        assert_eq!(
            EngineVariant::from_name("faster-whisper"),
            Some(EngineVariant::FasterWhisper)
        );
        assert_eq!(
            EngineVariant::from_name("whisper.cpp"),
            Some(EngineVariant::WhisperCpp)
        );
        assert_eq!(
            EngineVariant::from_name("WHISPER"),
            Some(EngineVariant::OpenAiWhisper)
        );
        assert_eq!(EngineVariant::from_name("deepgram"), None);
    }

    #[test]
    fn test_preference_from_name() {
        assert_eq!(
            EnginePreference::from_name("auto"),
            Some(EnginePreference::Auto)
        );
        assert_eq!(
            EnginePreference::from_name("whisper-cpp"),
            Some(EnginePreference::Only(EngineVariant::WhisperCpp))
        );
        assert_eq!(EnginePreference::from_name("none"), None);
    }

    #[test]
    fn test_preference_keys_are_distinct() {
        // Auto and an explicit variant must hash/compare as different cache keys.
        assert_ne!(
            EnginePreference::Auto,
            EnginePreference::Only(EngineVariant::FasterWhisper)
        );
    }
}
