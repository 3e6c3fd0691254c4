//! File naming.
//!
//! Files are named `{artist} - {title}{extension}` inside the download
//! directory, with characters that are invalid in file names replaced.
//! Members of an album or playlist are prefixed with their position, so
//! that tracks of the same name do not overwrite each other.

use std::path::{Path, PathBuf};

use crate::{protocol::media::Format, track::Track};

/// Longest file stem, in characters.
const MAX_STEM_LENGTH: usize = 200;

/// Replaces characters that are not allowed in file names on any common
/// platform, and trims what would confuse shells and file managers.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|chr| match chr {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            chr if chr.is_control() => '_',
            chr => chr,
        })
        .take(MAX_STEM_LENGTH)
        .collect();

    let sanitized = sanitized.trim().trim_end_matches('.');
    if sanitized.is_empty() {
        String::from("_")
    } else {
        sanitized.to_owned()
    }
}

/// The path a track is written to in a given format.
#[must_use]
pub fn track_path(location: &Path, track: &Track, format: Format) -> PathBuf {
    let stem = match track.position {
        Some(position) => format!("{position:02} - {} - {}", track.artist, track.title),
        None => format!("{} - {}", track.artist, track.title),
    };
    let stem = sanitize(&stem);
    location.join(format!("{stem}{}", format.extension()))
}
