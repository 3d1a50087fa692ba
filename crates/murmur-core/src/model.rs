//! Whisper model size table.
//!
//! Memory requirements and processing-speed factors are static lookup
//! tables, not measured at runtime. The speed factor is the approximate
//! ratio of processing time to audio duration on a typical CPU install and
//! feeds the orchestrator's timeout budget.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Available Whisper model sizes, common to all engine variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    LargeV2,
    LargeV3,
}

impl ModelSize {
    /// Returns the name passed to engine command lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::LargeV2 => "large-v2",
            Self::LargeV3 => "large-v3",
        }
    }

    /// Parses a model name string (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "tiny" => Some(Self::Tiny),
            "base" => Some(Self::Base),
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            "large-v2" | "large_v2" => Some(Self::LargeV2),
            "large-v3" | "large_v3" => Some(Self::LargeV3),
            _ => None,
        }
    }

    /// Returns a list of all model names.
    pub fn all_names() -> &'static [&'static str] {
        &[
            "tiny", "base", "small", "medium", "large", "large-v2", "large-v3",
        ]
    }

    /// All sizes, smallest first.
    pub fn all() -> [Self; 7] {
        [
            Self::Tiny,
            Self::Base,
            Self::Small,
            Self::Medium,
            Self::Large,
            Self::LargeV2,
            Self::LargeV3,
        ]
    }

    /// Approximate resident memory the engine needs for this model.
    pub fn memory_bytes(&self) -> u64 {
        const GIB: u64 = 1024 * 1024 * 1024;
        match self {
            Self::Tiny => GIB,
            Self::Base => GIB,
            Self::Small => 2 * GIB,
            Self::Medium => 5 * GIB,
            Self::Large | Self::LargeV2 | Self::LargeV3 => 10 * GIB,
        }
    }

    /// Approximate processing time as a multiple of audio duration.
    pub fn speed_factor(&self) -> f64 {
        match self {
            Self::Tiny => 0.3,
            Self::Base => 0.5,
            Self::Small => 1.0,
            Self::Medium => 2.0,
            Self::Large | Self::LargeV2 | Self::LargeV3 => 3.0,
        }
    }

    /// The baseline set reported when no cached model files are found.
    ///
    /// Absence of cached files does not mean the engine cannot fetch a model
    /// on demand; these sizes are auto-downloaded by every variant.
    pub fn baseline_set() -> [Self; 4] {
        [Self::Tiny, Self::Base, Self::Small, Self::Medium]
    }
}

impl Default for ModelSize {
    fn default() -> Self {
        Self::Base
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_name() {
        assert_eq!(ModelSize::from_name("base"), Some(ModelSize::Base));
        assert_eq!(ModelSize::from_name("LARGE-V3"), Some(ModelSize::LargeV3));
        assert_eq!(ModelSize::from_name("large_v2"), Some(ModelSize::LargeV2));
        assert_eq!(ModelSize::from_name("huge"), None);
    }

    #[test]
    fn test_all_names_parse() {
        for name in ModelSize::all_names() {
            assert!(
                ModelSize::from_name(name).is_some(),
                "Failed to parse model name: {}",
                name
            );
        }
    }

    #[test]
    fn test_tables_are_monotonic() {
        // Bigger models never need less memory or run faster.
        let sizes = ModelSize::all();
        for pair in sizes.windows(2) {
            assert!(pair[0].memory_bytes() <= pair[1].memory_bytes());
            assert!(pair[0].speed_factor() <= pair[1].speed_factor());
        }
    }

    #[test]
    fn test_baseline_set_is_auto_downloadable() {
        // The baseline stops below the large models, which engines do not
        // fetch silently.
        for size in ModelSize::baseline_set() {
            assert!(size.memory_bytes() <= ModelSize::Medium.memory_bytes());
        }
    }
}
