//! Track metadata from the `song.getData` gateway method.
//!
//! Besides display metadata, this carries the stream identity of a track:
//! the content hash, the media version, the fallback recording and the
//! per-format file sizes that tell which formats exist.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "SNG_ID": "3135556",
//!     "MD5_ORIGIN": "7d1c5c6d9e0b2a0b5e2f9a4d6a3e8c1f",
//!     "MEDIA_VERSION": "8",
//!     "FALLBACK": { "SNG_ID": "3135557" },
//!     "FILESIZE_MP3_128": "3347466",
//!     "FILESIZE_MP3_320": "8367421",
//!     "FILESIZE_FLAC": 0,
//!     "SNG_TITLE": "Harder, Better, Faster, Stronger",
//!     "VERSION": "",
//!     "ART_NAME": "Daft Punk",
//!     "ALB_TITLE": "Discovery",
//!     "ALB_PICTURE": "2e018122cb56986277102d2041a592c8",
//!     "ISRC": "GBDUW0000059",
//!     "DURATION": "224",
//!     "TRACK_NUMBER": "4",
//!     "AVAILABLE_COUNTRIES": { "STREAM_ADS": ["BE", "NL"] }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::{
    protocol::media::Format,
    track::{FileSize, Track, TrackId},
};

use super::{Method, StringOrUnknown};

impl Method for SongData {
    const METHOD: &'static str = "song.getData";
}

#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
#[serde(rename_all = "UPPERCASE")]
pub struct SongData {
    #[serde(rename = "SNG_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub track_id: TrackId,

    #[serde(default)]
    pub md5_origin: String,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub media_version: u32,

    #[serde(default)]
    pub fallback: Option<Fallback>,

    #[serde(default)]
    #[serde(rename = "SNG_TITLE")]
    pub title: StringOrUnknown,

    /// Version qualifier such as "Remastered", appended to the title.
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    #[serde(rename = "ART_NAME")]
    pub artist: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ALB_TITLE")]
    pub album_title: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ALB_PICTURE")]
    pub album_picture: String,

    #[serde(default)]
    pub isrc: Option<String>,

    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub track_number: Option<usize>,

    #[serde(default)]
    pub available_countries: AvailableCountries,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_128: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_320: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_flac: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp4_ra1: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp4_ra2: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp4_ra3: u64,

    #[serde(default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_misc: u64,
}

#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Deserialize, Debug, Hash)]
pub struct Fallback {
    #[serde(rename = "SNG_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub track_id: TrackId,
}

#[derive(Clone, PartialEq, Eq, Deserialize, Debug, Default, Hash)]
pub struct AvailableCountries {
    #[serde(default)]
    #[serde(rename = "STREAM_ADS")]
    pub stream_ads: Vec<String>,
}

#[serde_as]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Request {
    #[serde(rename = "sng_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub track_id: TrackId,
}

impl SongData {
    /// Title with its version qualifier, unless the title already has it.
    #[must_use]
    pub fn full_title(&self) -> String {
        let title = self.title.trim();
        let version = self.version.trim();
        if version.is_empty() || title.contains(version) {
            title.to_owned()
        } else {
            format!("{title} {version}")
        }
    }

    fn filesizes(&self) -> [(Format, u64); 7] {
        [
            (Format::MP4_RA3, self.filesize_mp4_ra3),
            (Format::MP4_RA2, self.filesize_mp4_ra2),
            (Format::MP4_RA1, self.filesize_mp4_ra1),
            (Format::FLAC, self.filesize_flac),
            (Format::MP3_320, self.filesize_mp3_320),
            (Format::MP3_128, self.filesize_mp3_128),
            (Format::MP3_MISC, self.filesize_mp3_misc),
        ]
    }
}

impl From<SongData> for Track {
    fn from(data: SongData) -> Self {
        // Only known sizes are kept: a zero from the catalog is not
        // authoritative and the format will be probed instead.
        let filesizes = data
            .filesizes()
            .into_iter()
            .filter(|(_, size)| *size > 0)
            .map(|(format, size)| {
                (
                    format,
                    FileSize {
                        size,
                        tested: false,
                    },
                )
            })
            .collect();

        Self {
            id: data.track_id,
            title: data.full_title(),
            md5_origin: data.md5_origin.to_ascii_lowercase(),
            media_version: data.media_version,
            fallback_id: data
                .fallback
                .map(|fallback| fallback.track_id)
                .filter(|id| id.is_valid()),
            countries: data.available_countries.stream_ads,
            filesizes,
            artist: data.artist.0,
            album: data.album_title.0,
            album_picture: data.album_picture,
            position: data.track_number,
            isrc: data.isrc.filter(|isrc| !isrc.is_empty()),
            ..Default::default()
        }
    }
}
