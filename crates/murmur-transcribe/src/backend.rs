//! Per-variant engine strategies.
//!
//! Each supported engine is a different command-line tool with its own flag
//! set, version probe, result-file naming, and model cache layout. One
//! strategy object per variant captures all of that; the orchestrator and
//! detector select a strategy once and pass it through instead of
//! re-matching on the variant at every step.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use murmur_core::{EngineVariant, ModelSize};

/// Inputs for building an engine command line.
pub(crate) struct CommandContext<'a> {
    pub executable: &'a Path,
    pub audio: &'a Path,
    pub model: ModelSize,
    /// Resolved model file, for engines that take a file instead of a name.
    pub model_file: Option<&'a Path>,
    /// `None` means let the engine auto-detect.
    pub language: Option<&'a str>,
    pub word_timestamps: bool,
    pub output_dir: &'a Path,
}

/// Variant-specific behavior, selected once after detection.
pub(crate) trait Backend: Send + Sync {
    fn variant(&self) -> EngineVariant;

    /// Command names to look for during auto-detection, most specific first.
    fn command_names(&self) -> &'static [&'static str];

    /// Arguments for the identity/version probe.
    fn probe_args(&self) -> &'static [&'static str];

    /// Whether probe output carries this variant's fingerprint.
    ///
    /// Acceptance is by content only; generic names like `whisper` or
    /// `main` are shared by unrelated binaries, and some working builds
    /// exit non-zero from the probe.
    fn matches_probe_output(&self, output: &str) -> bool;

    /// Extracts a printable version from probe output, when it carries one.
    fn parse_version(&self, output: &str) -> Option<String>;

    /// Builds the transcription command line.
    fn build_command(&self, ctx: &CommandContext<'_>) -> Command;

    /// Where the engine writes its JSON result for the given inputs.
    fn output_path(&self, ctx: &CommandContext<'_>) -> PathBuf;

    /// Directories scanned for locally installed model weights.
    fn model_dirs(&self) -> Vec<PathBuf>;

    /// Whether a cache entry name indicates this model size.
    fn entry_matches_model(&self, entry_name: &str, model: ModelSize) -> bool;

    /// Resolves the model weight file, for engines invoked with a file path.
    ///
    /// Falls back to the conventional location when nothing is cached; the
    /// engine's own error then classifies as a missing model.
    fn model_file(&self, _model: ModelSize) -> Option<PathBuf> {
        None
    }
}

pub(crate) fn backend(variant: EngineVariant) -> &'static dyn Backend {
    match variant {
        EngineVariant::FasterWhisper => &FasterWhisper,
        EngineVariant::WhisperCpp => &WhisperCpp,
        EngineVariant::OpenAiWhisper => &OpenAiWhisper,
    }
}

/// Model-size token match with boundary care: plain `large` must not match
/// `large-v2`/`large-v3` cache entries.
fn contains_model_token(name: &str, model: ModelSize) -> bool {
    let name = name.to_lowercase();
    match model {
        ModelSize::Large => name.contains("large") && !name.contains("large-v"),
        _ => name.contains(model.name()),
    }
}

fn home_join(rel: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(rel))
}

fn audio_stem(audio: &Path) -> String {
    audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

// --- faster-whisper -------------------------------------------------------

struct FasterWhisper;

static FASTER_WHISPER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"faster-whisper\s+v?(\d[\w.]*)").expect("valid regex"));

impl Backend for FasterWhisper {
    fn variant(&self) -> EngineVariant {
        EngineVariant::FasterWhisper
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["faster-whisper"]
    }

    fn probe_args(&self) -> &'static [&'static str] {
        &["--version"]
    }

    fn matches_probe_output(&self, output: &str) -> bool {
        output.to_lowercase().contains("faster-whisper")
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        FASTER_WHISPER_VERSION
            .captures(&output.to_lowercase())
            .map(|c| c[1].to_string())
    }

    fn build_command(&self, ctx: &CommandContext<'_>) -> Command {
        let mut cmd = Command::new(ctx.executable);
        cmd.arg(ctx.audio)
            .arg("--model")
            .arg(ctx.model.name())
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(ctx.output_dir)
            .arg("--device")
            .arg("auto")
            .arg("--compute_type")
            .arg("int8");
        if let Some(lang) = ctx.language {
            cmd.arg("--language").arg(lang);
        }
        if ctx.word_timestamps {
            cmd.arg("--word_timestamps");
        }
        cmd
    }

    fn output_path(&self, ctx: &CommandContext<'_>) -> PathBuf {
        ctx.output_dir.join(format!("{}.json", audio_stem(ctx.audio)))
    }

    fn model_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        // Hugging Face hub cache, where CTranslate2 conversions land.
        if let Some(path) = home_join(".cache/huggingface/hub") {
            dirs.push(path);
        }
        if let Some(cache) = dirs::cache_dir() {
            dirs.push(cache.join("huggingface").join("hub"));
        }
        dirs.dedup();
        dirs
    }

    fn entry_matches_model(&self, entry_name: &str, model: ModelSize) -> bool {
        entry_name.to_lowercase().contains("whisper") && contains_model_token(entry_name, model)
    }
}

// --- whisper.cpp ----------------------------------------------------------

struct WhisperCpp;

static WHISPER_CPP_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"whisper(?:\.cpp)?\s+v(\d[\w.]*)").expect("valid regex"));

impl Backend for WhisperCpp {
    fn variant(&self) -> EngineVariant {
        EngineVariant::WhisperCpp
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["whisper-cli", "whisper-cpp"]
    }

    // whisper.cpp has no --version; its usage text is the fingerprint.
    fn probe_args(&self) -> &'static [&'static str] {
        &["--help"]
    }

    fn matches_probe_output(&self, output: &str) -> bool {
        let text = output.to_lowercase();
        text.contains("whisper")
            && (text.contains("usage:")
                || text.contains("--output-json")
                || text.contains("-ojf"))
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        WHISPER_CPP_VERSION
            .captures(&output.to_lowercase())
            .map(|c| c[1].to_string())
    }

    fn build_command(&self, ctx: &CommandContext<'_>) -> Command {
        let model_file = ctx
            .model_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(format!("ggml-{}.bin", ctx.model.name())));
        let prefix = ctx.output_dir.join(audio_stem(ctx.audio));

        let mut cmd = Command::new(ctx.executable);
        cmd.arg("-m")
            .arg(model_file)
            .arg("-f")
            .arg(ctx.audio)
            .arg("-ojf")
            .arg("-of")
            .arg(prefix)
            .arg("-pp")
            .arg("-l")
            .arg(ctx.language.unwrap_or("auto"));
        cmd
    }

    fn output_path(&self, ctx: &CommandContext<'_>) -> PathBuf {
        // `-of <prefix>` plus the `.json` the full-JSON writer appends.
        ctx.output_dir.join(format!("{}.json", audio_stem(ctx.audio)))
    }

    fn model_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(data) = dirs::data_dir() {
            dirs.push(data.join("whisper.cpp"));
        }
        if let Some(cache) = dirs::cache_dir() {
            dirs.push(cache.join("whisper.cpp"));
        }
        if let Some(path) = home_join("whisper.cpp/models") {
            dirs.push(path);
        }
        dirs
    }

    fn entry_matches_model(&self, entry_name: &str, model: ModelSize) -> bool {
        entry_name.to_lowercase().starts_with("ggml-") && contains_model_token(entry_name, model)
    }

    fn model_file(&self, model: ModelSize) -> Option<PathBuf> {
        let file_name = format!("ggml-{}.bin", model.name());
        let dirs = self.model_dirs();
        for dir in &dirs {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        // Conventional location; a missing file surfaces as the engine's
        // own model-not-found error.
        dirs.first().map(|dir| dir.join(file_name))
    }
}

// --- openai-whisper -------------------------------------------------------

struct OpenAiWhisper;

/// openai-whisper versions are dates, e.g. `20231117`.
static OPENAI_WHISPER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{8})\b").expect("valid regex"));

impl Backend for OpenAiWhisper {
    fn variant(&self) -> EngineVariant {
        EngineVariant::OpenAiWhisper
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["whisper"]
    }

    fn probe_args(&self) -> &'static [&'static str] {
        &["--version"]
    }

    fn matches_probe_output(&self, output: &str) -> bool {
        let text = output.to_lowercase();
        text.contains("openai-whisper") || OPENAI_WHISPER_VERSION.is_match(text.trim())
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        OPENAI_WHISPER_VERSION
            .captures(output)
            .map(|c| c[1].to_string())
    }

    fn build_command(&self, ctx: &CommandContext<'_>) -> Command {
        let mut cmd = Command::new(ctx.executable);
        cmd.arg(ctx.audio)
            .arg("--model")
            .arg(ctx.model.name())
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(ctx.output_dir)
            .arg("--verbose")
            .arg("True");
        if let Some(lang) = ctx.language {
            cmd.arg("--language").arg(lang);
        }
        if ctx.word_timestamps {
            cmd.arg("--word_timestamps").arg("True");
        }
        cmd
    }

    fn output_path(&self, ctx: &CommandContext<'_>) -> PathBuf {
        ctx.output_dir.join(format!("{}.json", audio_stem(ctx.audio)))
    }

    fn model_dirs(&self) -> Vec<PathBuf> {
        home_join(".cache/whisper").into_iter().collect()
    }

    fn entry_matches_model(&self, entry_name: &str, model: ModelSize) -> bool {
        let name = entry_name.to_lowercase();
        name.ends_with(".pt") && contains_model_token(&name, model)
    }
}
