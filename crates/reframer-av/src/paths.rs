//! Output naming and container detection.
//!
//! Recordings are never placed by the caller: the output always sits next to
//! the source with `_reframed` appended to its base name, so the container
//! format follows from the source extension.

use std::path::{Path, PathBuf};

/// Suffix appended to the source base name for recorded output.
pub const OUTPUT_SUFFIX: &str = "_reframed";

/// Container families that matter for output muxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// MPEG-4 Part 14 container
    Mp4,
    /// QuickTime container
    Mov,
    /// Matroska container
    Mkv,
    /// WebM container
    Webm,
    /// AVI container
    Avi,
    /// MPEG transport stream
    Ts,
}

impl Container {
    /// Detect the container from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Whether the muxer supports moving the index to the front of the file.
    pub fn supports_faststart(&self) -> bool {
        matches!(self, Container::Mp4 | Container::Mov)
    }
}

impl std::str::FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" | "m4v" => Ok(Container::Mp4),
            "mov" | "quicktime" => Ok(Container::Mov),
            "mkv" | "matroska" => Ok(Container::Mkv),
            "webm" => Ok(Container::Webm),
            "avi" => Ok(Container::Avi),
            "ts" | "mpegts" => Ok(Container::Ts),
            _ => Err(format!("Unknown container format: {}", s)),
        }
    }
}

/// Derive the recording path for a source file.
///
/// `{directory}/{base-name}_reframed.{extension}`, where the base name is
/// everything before the last dot.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use reframer_av::paths::reframed_path;
///
/// assert_eq!(
///     reframed_path(Path::new("/videos/trip.2024.mp4")),
///     Path::new("/videos/trip.2024_reframed.mp4"),
/// );
/// ```
pub fn reframed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, OUTPUT_SUFFIX),
    };

    input.with_file_name(file_name)
}

/// Check if a path has a video file extension.
pub fn is_video_file(path: &Path) -> bool {
    Container::from_path(path).is_some()
}
