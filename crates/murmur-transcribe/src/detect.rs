//! Engine detection.
//!
//! Probes the local system for one of the supported engines, determines an
//! executable path, a reported version, and the set of locally cached model
//! weights. Results are cached per requested preference with a short TTL so
//! repeated transcriptions don't re-run probe commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use murmur_core::{EnginePreference, EngineVariant, ModelSize};
use murmur_media::locate_tool;

use crate::backend::{Backend, backend};

/// How long a detection result (positive or negative) stays valid.
const DETECTION_TTL: Duration = Duration::from_secs(5 * 60);

/// Probe commands that hang get cut off here.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the detector found.
#[derive(Debug, Clone)]
pub struct EngineDetection {
    pub available: bool,
    pub variant: Option<EngineVariant>,
    pub executable: Option<PathBuf>,
    pub version: Option<String>,
    /// Never empty for an available engine; defaults to the baseline
    /// auto-downloadable set when no cached weights are found.
    pub installed_models: Vec<ModelSize>,
}

impl EngineDetection {
    fn not_found() -> Self {
        Self {
            available: false,
            variant: None,
            executable: None,
            version: None,
            installed_models: Vec::new(),
        }
    }

    fn found(variant: EngineVariant, executable: PathBuf, version: Option<String>) -> Self {
        Self {
            available: true,
            variant: Some(variant),
            executable: Some(executable),
            version,
            installed_models: scan_models(backend(variant)),
        }
    }
}

/// Detection cache keyed by the exact requested preference.
///
/// An entry cached for `Auto` is never served to a caller asking for a
/// specific variant, and vice versa.
struct DetectionCache {
    ttl: Duration,
    entries: Mutex<HashMap<EnginePreference, (EngineDetection, Instant)>>,
}

impl DetectionCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, preference: EnginePreference) -> Option<EngineDetection> {
        let entries = self.entries.lock();
        let (detection, stored_at) = entries.get(&preference)?;
        if stored_at.elapsed() < self.ttl {
            Some(detection.clone())
        } else {
            None
        }
    }

    fn put(&self, preference: EnginePreference, detection: EngineDetection) {
        self.entries
            .lock()
            .insert(preference, (detection, Instant::now()));
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Probes for installed engines, with per-preference result caching.
pub struct EngineDetector {
    cache: DetectionCache,
}

impl Default for EngineDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineDetector {
    pub fn new() -> Self {
        Self {
            cache: DetectionCache::new(DETECTION_TTL),
        }
    }

    /// Test/teardown hook: forget all cached detections.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Finds an engine matching `preference`.
    ///
    /// A `custom_path` is always tried before the cache and before
    /// auto-detection. With `force_enable` it is accepted on file existence
    /// alone (for binaries whose version probe misbehaves on atypical
    /// CPUs); otherwise it must answer a probe with a known fingerprint. A
    /// custom path that does not exist falls through to auto-detection in
    /// both modes.
    pub async fn detect(
        &self,
        preference: EnginePreference,
        custom_path: Option<&Path>,
        force_enable: bool,
    ) -> EngineDetection {
        if let Some(path) = custom_path {
            if let Some(detection) = self.try_custom_path(path, preference, force_enable).await {
                return detection;
            }
            warn!(path = ?path, "Custom engine path rejected, falling back to auto-detection");
        }

        if let Some(cached) = self.cache.get(preference) {
            debug!(%preference, available = cached.available, "Detection served from cache");
            return cached;
        }

        let detection = self.probe_system(preference).await;
        self.cache.put(preference, detection.clone());
        detection
    }

    async fn try_custom_path(
        &self,
        path: &Path,
        preference: EnginePreference,
        force_enable: bool,
    ) -> Option<EngineDetection> {
        // Nonexistent files are rejected in both modes; force-enable skips
        // probing, not existence.
        if !path.is_file() {
            return None;
        }

        if force_enable {
            let variant = infer_variant_from_path(path, preference);
            info!(path = ?path, %variant, "Using force-enabled engine path without probing");
            return Some(EngineDetection::found(variant, path.to_path_buf(), None));
        }

        for variant in probe_order(preference) {
            if let Some(version) = probe_binary(path, backend(variant)).await {
                info!(path = ?path, %variant, ?version, "Custom engine path validated");
                return Some(EngineDetection::found(variant, path.to_path_buf(), version));
            }
        }
        None
    }

    async fn probe_system(&self, preference: EnginePreference) -> EngineDetection {
        for variant in probe_order(preference) {
            let b = backend(variant);
            for name in b.command_names() {
                let Some(path) = locate_tool(name) else {
                    continue;
                };
                if let Some(version) = probe_binary(&path, b).await {
                    info!(%variant, path = ?path, ?version, "Detected engine");
                    return EngineDetection::found(variant, path, version);
                }
                debug!(path = ?path, %variant, "Binary found but probe output did not match");
            }
        }

        info!(%preference, "No speech-recognition engine found");
        EngineDetection::not_found()
    }
}

/// Variants to try, in order. An explicit preference restricts the search
/// to that variant; otherwise the platform decides who goes first.
fn probe_order(preference: EnginePreference) -> Vec<EngineVariant> {
    match preference {
        EnginePreference::Only(variant) => vec![variant],
        EnginePreference::Auto => {
            if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
                // whisper.cpp ships a native Metal build on Apple silicon.
                vec![
                    EngineVariant::WhisperCpp,
                    EngineVariant::FasterWhisper,
                    EngineVariant::OpenAiWhisper,
                ]
            } else {
                // pip install, easiest everywhere else.
                vec![
                    EngineVariant::FasterWhisper,
                    EngineVariant::WhisperCpp,
                    EngineVariant::OpenAiWhisper,
                ]
            }
        }
    }
}

/// Runs one variant's identity probe against a binary.
///
/// Returns `Some(version)` when the combined stdout/stderr matches the
/// variant's fingerprint. The exit code is deliberately ignored: some
/// builds answer the probe correctly and still exit non-zero, so content is
/// the only signal that matters. `None` means the output matched nothing.
async fn probe_binary(path: &Path, backend: &dyn Backend) -> Option<Option<String>> {
    let output = Command::new(path)
        .args(backend.probe_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(path = ?path, error = %e, "Probe command failed to run");
            return None;
        }
        Err(_) => {
            debug!(path = ?path, "Probe command timed out");
            return None;
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if backend.matches_probe_output(&text) {
        Some(backend.parse_version(&text))
    } else {
        None
    }
}

/// Picks a variant for a force-enabled path: filename first, then the
/// caller's preference, then the most common wrapper.
fn infer_variant_from_path(path: &Path, preference: EnginePreference) -> EngineVariant {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains("faster") {
        return EngineVariant::FasterWhisper;
    }
    if name.contains("whisper-cli") || name.contains("whisper.cpp") || name.contains("main") {
        return EngineVariant::WhisperCpp;
    }
    if let Some(variant) = preference.variant() {
        return variant;
    }
    if name.contains("whisper") {
        return EngineVariant::OpenAiWhisper;
    }
    EngineVariant::FasterWhisper
}

/// Scans a variant's well-known cache directories for model weights.
///
/// Both files and directories count. An empty scan yields the baseline
/// auto-downloadable set: no cached weights does not mean the engine cannot
/// fetch them on demand.
fn scan_models(backend: &dyn Backend) -> Vec<ModelSize> {
    let mut found = Vec::new();
    for dir in backend.model_dirs() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            for size in ModelSize::all() {
                if backend.entry_matches_model(&name, size) && !found.contains(&size) {
                    found.push(size);
                }
            }
        }
    }

    if found.is_empty() {
        return ModelSize::baseline_set().to_vec();
    }
    found.sort_by_key(|size| ModelSize::all().iter().position(|s| s == size));
    found
}
