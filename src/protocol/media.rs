//! Audio formats and delivery ciphers for Deezer.
//!
//! This module holds the static format tier table, ordered from highest
//! fidelity down, in two disjoint families:
//!
//! | rank | format  | wire id | family   | extension |
//! |------|---------|---------|----------|-----------|
//! | 0    | MP4_RA3 | 15      | spatial  | .mp4      |
//! | 1    | MP4_RA2 | 14      | spatial  | .mp4      |
//! | 2    | MP4_RA1 | 13      | spatial  | .mp4      |
//! | 3    | FLAC    | 9       | standard | .flac     |
//! | 4    | MP3_320 | 3       | standard | .mp3      |
//! | 5    | MP3_128 | 1       | standard | .mp3      |
//! | 6    | MP3_MISC| 8       | standard | .mp3      |
//! | 7    | LOCAL   | 0       | standard | .mp3      |
//!
//! `MP3_MISC` is the unconditional default and is never probed as a
//! candidate. `LOCAL` only applies to user-uploaded tracks.
//!
//! Formats compare by their rank in the table, never by wire id: a lower
//! rank means a higher fidelity.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Audio format and quality level.
///
/// Variants are declared in rank order. The discriminant is the wire id
/// used in derived stream URLs.
#[derive(Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize, Debug, Hash)]
#[expect(non_camel_case_types)]
#[repr(u8)]
pub enum Format {
    /// 360 Reality Audio, high (15)
    MP4_RA3 = 15,
    /// 360 Reality Audio, medium (14)
    MP4_RA2 = 14,
    /// 360 Reality Audio, low (13)
    MP4_RA1 = 13,
    /// FLAC lossless (9)
    FLAC = 9,
    /// 320 kbps MP3 (3)
    MP3_320 = 3,
    /// 128 kbps MP3 (1)
    MP3_128 = 1,
    /// Other or unknown MP3 bitrate (8, default)
    #[default]
    MP3_MISC = 8,
    /// User-uploaded track (0)
    LOCAL = 0,
}

/// Format family. Fallback never crosses families.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Family {
    /// 360 Reality Audio formats
    Spatial,
    /// Stereo MP3 and FLAC formats
    Standard,
}

/// The format tier table in rank order.
pub const TIERS: [Format; 8] = [
    Format::MP4_RA3,
    Format::MP4_RA2,
    Format::MP4_RA1,
    Format::FLAC,
    Format::MP3_320,
    Format::MP3_128,
    Format::MP3_MISC,
    Format::LOCAL,
];

impl Format {
    /// Position in the tier table; lower is better.
    #[must_use]
    pub fn rank(self) -> usize {
        match self {
            Self::MP4_RA3 => 0,
            Self::MP4_RA2 => 1,
            Self::MP4_RA1 => 2,
            Self::FLAC => 3,
            Self::MP3_320 => 4,
            Self::MP3_128 => 5,
            Self::MP3_MISC => 6,
            Self::LOCAL => 7,
        }
    }

    /// Numeric id as used on the wire.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a format by its wire id.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        TIERS.into_iter().find(|format| format.id() == id)
    }

    #[must_use]
    pub fn family(self) -> Family {
        match self {
            Self::MP4_RA3 | Self::MP4_RA2 | Self::MP4_RA1 => Family::Spatial,
            _ => Family::Standard,
        }
    }

    #[must_use]
    pub fn is_spatial(self) -> bool {
        self.family() == Family::Spatial
    }

    /// File extension including the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self.family() {
            Family::Spatial => ".mp4",
            Family::Standard if self == Self::FLAC => ".flac",
            Family::Standard => ".mp3",
        }
    }

    /// Whether this format is ever probed during format negotiation.
    #[must_use]
    pub fn is_probed(self) -> bool {
        !matches!(self, Self::MP3_MISC | Self::LOCAL)
    }

    /// Probe candidates of a family, highest fidelity first.
    pub fn candidates(family: Family) -> impl Iterator<Item = Self> {
        TIERS
            .into_iter()
            .filter(move |format| format.is_probed() && format.family() == family)
    }
}

impl Ord for Format {
    /// Orders by fidelity, so that `FLAC > MP3_320`.
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

impl PartialOrd for Format {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Format {
    /// Formats the audio format for display.
    ///
    /// Shows the format name (e.g., "`MP3_320`", "FLAC") matching
    /// the protocol's string representation.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for Format {
    type Err = Error;

    /// Parses a format by name (`flac`, `MP3_320`) or by wire id (`9`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u8>() {
            return Self::from_id(id)
                .ok_or_else(|| Error::invalid_argument(format!("unknown format id {id}")));
        }

        let upper = s.to_ascii_uppercase();
        let format = match upper.as_str() {
            "MP4_RA3" | "360_HQ" => Self::MP4_RA3,
            "MP4_RA2" | "360_MQ" => Self::MP4_RA2,
            "MP4_RA1" | "360_LQ" => Self::MP4_RA1,
            "FLAC" => Self::FLAC,
            "MP3_320" | "320" => Self::MP3_320,
            "MP3_128" | "128" => Self::MP3_128,
            "MP3_MISC" => Self::MP3_MISC,
            _ => return Err(Error::invalid_argument(format!("unknown format {s}"))),
        };

        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_rank_not_wire_id() {
        // MP3_MISC has a higher wire id than MP3_320 but ranks below it
        assert!(Format::MP3_320 > Format::MP3_MISC);
        assert!(Format::FLAC > Format::MP3_320);
        assert!(Format::MP4_RA1 > Format::FLAC);
        assert!(Format::MP3_128 > Format::LOCAL);
    }

    #[test]
    fn candidates_exclude_unprobed_formats() {
        let standard: Vec<_> = Format::candidates(Family::Standard).collect();
        assert_eq!(standard, [Format::FLAC, Format::MP3_320, Format::MP3_128]);

        let spatial: Vec<_> = Format::candidates(Family::Spatial).collect();
        assert_eq!(spatial, [Format::MP4_RA3, Format::MP4_RA2, Format::MP4_RA1]);
    }

    #[test]
    fn parses_names_and_ids() {
        assert_eq!("flac".parse::<Format>().unwrap(), Format::FLAC);
        assert_eq!("3".parse::<Format>().unwrap(), Format::MP3_320);
        assert_eq!("360_hq".parse::<Format>().unwrap(), Format::MP4_RA3);
        assert!("ogg".parse::<Format>().is_err());
        assert!("42".parse::<Format>().is_err());
    }

    #[test]
    fn extensions() {
        assert_eq!(Format::MP4_RA2.extension(), ".mp4");
        assert_eq!(Format::FLAC.extension(), ".flac");
        assert_eq!(Format::MP3_MISC.extension(), ".mp3");
    }
}
