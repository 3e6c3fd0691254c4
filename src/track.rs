use std::{
    collections::HashMap,
    fmt,
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::protocol::media::Format;

/// Catalog identifier of a track.
///
/// Negative ids are user-uploaded tracks, zero means the track is not on
/// Deezer at all.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl TrackId {
    #[must_use]
    pub fn is_local(self) -> bool {
        self.0 < 0
    }

    /// Whether this id can refer to a track at all. The gateway uses `0`
    /// for "no track", for instance as a fallback id.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for TrackId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cached outcome of probing one format.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FileSize {
    /// Size in bytes, or `0` when unavailable.
    pub size: u64,
    /// Whether the size was confirmed by a probe.
    pub tested: bool,
}

/// The parts of a track that change when another recording is substituted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Identity {
    pub id: TrackId,
    pub md5_origin: String,
    pub media_version: u32,
    pub fallback_id: Option<TrackId>,
    pub countries: Vec<String>,
    pub filesizes: HashMap<Format, FileSize>,
}

/// A single audio item being downloaded.
///
/// Built from catalog metadata, then mutated during format negotiation
/// (filesize cache, selected format, resolved urls) and by substitution.
#[derive(Clone, Debug, Default)]
pub struct Track {
    pub id: TrackId,

    /// Content hash as lowercase hex. Empty when the track is not encoded.
    pub md5_origin: String,
    pub media_version: u32,
    pub fallback_id: Option<TrackId>,

    /// Countries where the track may stream. Empty means unrestricted.
    pub countries: Vec<String>,

    pub filesizes: HashMap<Format, FileSize>,
    pub format: Option<Format>,
    pub urls: HashMap<Format, Url>,

    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_picture: String,
    pub position: Option<usize>,
    pub isrc: Option<String>,
}

impl Track {
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    #[must_use]
    pub fn is_encoded(&self) -> bool {
        !self.md5_origin.is_empty()
    }

    /// Returns the cached probe result for a format.
    #[must_use]
    pub fn filesize(&self, format: Format) -> FileSize {
        self.filesizes.get(&format).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            md5_origin: self.md5_origin.clone(),
            media_version: self.media_version,
            fallback_id: self.fallback_id,
            countries: self.countries.clone(),
            filesizes: self.filesizes.clone(),
        }
    }

    /// Replaces the identity of this track in place.
    ///
    /// Resolved urls are derived from the identity and are discarded.
    pub fn set_identity(&mut self, identity: Identity) {
        self.id = identity.id;
        self.md5_origin = identity.md5_origin;
        self.media_version = identity.media_version;
        self.fallback_id = identity.fallback_id;
        self.countries = identity.countries;
        self.filesizes = identity.filesizes;
        self.urls.clear();
        self.format = None;
    }

    /// Adopts the identity of a substitute recording, keeping this track's
    /// display metadata. Probe results of the old identity are dropped.
    pub fn adopt(&mut self, other: &Track) {
        let mut identity = other.identity();
        identity.filesizes = other
            .filesizes
            .iter()
            .filter(|(_, filesize)| filesize.size > 0)
            .map(|(format, filesize)| {
                (
                    *format,
                    FileSize {
                        size: filesize.size,
                        tested: false,
                    },
                )
            })
            .collect();
        self.set_identity(identity);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist, self.title)
    }
}
