//! External tool discovery.
//!
//! Fixed, platform-specific candidate locations are tried in order before a
//! generic PATH lookup, the same strategy the engine detector uses. Package
//! managers routinely install into directories that are not on the PATH of
//! a GUI-launched host process, so the explicit list comes first.

use std::path::PathBuf;

use tracing::debug;

#[cfg(target_os = "macos")]
fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/opt/local/bin"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join(".local/bin"));
    }
    dirs
}

#[cfg(target_os = "linux")]
fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/snap/bin"),
        PathBuf::from("/var/lib/flatpak/exports/bin"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join(".local/bin"));
    }
    dirs
}

#[cfg(target_os = "windows")]
fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("C:\\Program Files\\ffmpeg\\bin"),
        PathBuf::from("C:\\ffmpeg\\bin"),
    ];
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        let profile = PathBuf::from(profile);
        dirs.push(profile.join("scoop").join("shims"));
        dirs.push(profile.join("AppData\\Local\\Microsoft\\WinGet\\Links"));
    }
    dirs
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn candidate_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")]
}

#[cfg(windows)]
fn executable_name(name: &str) -> String {
    format!("{name}.exe")
}

#[cfg(not(windows))]
fn executable_name(name: &str) -> String {
    name.to_string()
}

/// Finds an external tool by walking the platform candidate list, then
/// falling back to a PATH lookup.
pub fn locate_tool(name: &str) -> Option<PathBuf> {
    let file_name = executable_name(name);
    for dir in candidate_dirs() {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            debug!(tool = name, path = ?candidate, "Found tool in candidate dir");
            return Some(candidate);
        }
    }
    match which::which(name) {
        Ok(path) => {
            debug!(tool = name, path = ?path, "Found tool on PATH");
            Some(path)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_missing_tool() {
        assert!(locate_tool("definitely-not-a-real-tool-9b1f").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_common_tool() {
        // `sh` is on every unix PATH or in /usr/bin.
        assert!(locate_tool("sh").is_some());
    }
}
