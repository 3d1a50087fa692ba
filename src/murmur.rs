use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_core::{Config, ConfigManager, DEFAULT_LOG_LEVEL, EnginePreference, ModelSize};
use murmur_process::ProcessRegistry;
use murmur_transcribe::{ProgressUpdate, TranscribeRequest, TranscriptionService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod render;
use render::{OutputFormat, render};

/// Transcribe local audio and video files with whatever Whisper-family
/// engine is installed.
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Media file to transcribe
    media: PathBuf,

    /// Model size (tiny, base, small, medium, large, large-v2, large-v3)
    #[arg(short, long)]
    model: Option<String>,

    /// Language code (ISO 639-1) or "auto"
    #[arg(short, long)]
    language: Option<String>,

    /// Engine to use (auto, faster-whisper, whisper-cpp, openai-whisper)
    #[arg(short, long)]
    engine: Option<String>,

    /// Explicit engine binary, tried before auto-detection
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// Accept --engine-path on existence alone, skipping the version probe
    #[arg(long)]
    force_engine_path: bool,

    /// Ask the engine for word-level timestamps
    #[arg(short, long)]
    word_timestamps: bool,

    /// Media duration in seconds, when already known (skips probing)
    #[arg(long)]
    duration: Option<f64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Suppress the progress line on stderr
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger; stderr keeps stdout clean for the transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MURMUR_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config; save back to create the file if it doesn't exist.
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    config_manager.save(&config)?;

    let request = build_request(&cli, &config)?;

    let registry = ProcessRegistry::new();
    let service = Arc::new(TranscriptionService::new(Arc::clone(&registry)));

    // Ctrl-C cancels the run and reaps every registered process, so no
    // engine or ffmpeg child survives us.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling");
                cancel.cancel();
                let killed = registry.kill_all();
                if killed > 0 {
                    info!(killed, "Killed registered processes");
                }
            }
        });
    }

    let mut request = request;
    request.cancellation = Some(cancel);
    if !cli.quiet {
        request = request.with_progress(Arc::new(progress_line));
    }

    match service.transcribe(&cli.media, request).await {
        Ok(result) => {
            render(&result, cli.format, std::io::stdout().lock())?;
            Ok(())
        }
        Err(err) => {
            error!(kind = ?err.kind(), message = err.message(), "Transcription failed");
            eprintln!("{}", err.user_message());
            std::process::exit(1);
        }
    }
}

/// Merges CLI flags over the persisted config into one request.
fn build_request(cli: &Cli, config: &Config) -> Result<TranscribeRequest> {
    let model = match &cli.model {
        Some(name) => ModelSize::from_name(name).with_context(|| {
            format!(
                "unknown model '{}', expected one of: {}",
                name,
                ModelSize::all_names().join(", ")
            )
        })?,
        None => config.model_size(),
    };

    let preference = match &cli.engine {
        Some(name) => EnginePreference::from_name(name).with_context(|| {
            format!("unknown engine '{name}', expected auto, faster-whisper, whisper-cpp, or openai-whisper")
        })?,
        None => config.engine_preference(),
    };

    let mut request = TranscribeRequest::new(model);
    request.preference = preference;
    request.language = cli
        .language
        .clone()
        .or_else(|| config.language().map(String::from));
    request.engine_path = cli.engine_path.clone().or_else(|| config.engine_path.clone());
    request.force_engine_path = cli.force_engine_path || config.force_engine_path;
    request.word_timestamps = cli.word_timestamps || config.word_timestamps;
    request.audio_duration = cli.duration;
    Ok(request)
}

/// Single carriage-returned progress line on stderr.
fn progress_line(update: ProgressUpdate) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r[{:>3}%] {:<40}", update.percent, update.status);
    if update.percent >= 100 {
        let _ = writeln!(stderr);
    }
    let _ = stderr.flush();
}
