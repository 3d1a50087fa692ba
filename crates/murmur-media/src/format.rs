//! Supported media formats.

use std::path::Path;

/// Audio container extensions the engines consume directly.
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "aac", "flac", "ogg", "oga", "opus", "wma",
];

/// Video container extensions that need audio extraction first.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "mkv", "webm", "avi", "m4v", "mpg", "mpeg", "wmv", "flv", "3gp",
];

/// Whether a file is directly consumable audio or needs extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Classifies a path by extension. `None` means unsupported.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Every supported extension, for help text and validation messages.
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    AUDIO_EXTENSIONS.iter().chain(VIDEO_EXTENSIONS).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_audio_kinds() {
        assert_eq!(
            media_kind(&PathBuf::from("note.mp3")),
            Some(MediaKind::Audio)
        );
        assert_eq!(
            media_kind(&PathBuf::from("/some/dir/Take.WAV")),
            Some(MediaKind::Audio)
        );
    }

    #[test]
    fn test_video_kinds() {
        assert_eq!(
            media_kind(&PathBuf::from("lecture.mp4")),
            Some(MediaKind::Video)
        );
        assert_eq!(
            media_kind(&PathBuf::from("clip.WebM")),
            Some(MediaKind::Video)
        );
    }

    #[test]
    fn test_unsupported() {
        assert_eq!(media_kind(&PathBuf::from("notes.txt")), None);
        assert_eq!(media_kind(&PathBuf::from("no_extension")), None);
    }
}
