//! Playlists from the `playlist.getData` and `playlist.getSongs` gateway
//! methods.

use serde::{Deserialize, Serialize};

use super::{Method, SongData, StringOrUnknown};

impl Method for PlaylistData {
    const METHOD: &'static str = "playlist.getData";
}

impl Method for PlaylistTracks {
    const METHOD: &'static str = "playlist.getSongs";
}

#[derive(Clone, PartialEq, Eq, Deserialize, Debug, Default)]
pub struct PlaylistData {
    #[serde(default)]
    #[serde(rename = "TITLE")]
    pub title: StringOrUnknown,

    /// Name of the user that created the playlist.
    #[serde(default)]
    #[serde(rename = "PARENT_USERNAME")]
    pub creator: StringOrUnknown,
}

/// One track of a playlist listing.
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(transparent)]
pub struct PlaylistTracks(pub SongData);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Request {
    pub playlist_id: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct TracksRequest {
    pub playlist_id: String,

    /// Number of tracks to list; `-1` lists all.
    #[serde(rename = "nb")]
    pub count: i64,
}
