//! Core types and configuration for murmur.
//!
//! This crate provides the engine tags, model table, canonical transcript
//! model, and classified error type shared by all murmur sub-crates.

mod config;
mod engine;
mod error;
mod model;
mod transcript;

pub use config::{Config, ConfigManager};
pub use engine::{EnginePreference, EngineVariant};
pub use error::{ErrorKind, TranscribeError};
pub use model::ModelSize;
pub use transcript::{TranscriptionResult, TranscriptionSegment, TranscriptionWord};

/// Application name
pub const APP_NAME: &str = "murmur";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Murmur";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
