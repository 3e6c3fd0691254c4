//! Albums from the `album.getData` and `song.getListByAlbum` gateway
//! methods.

use serde::{Deserialize, Serialize};

use super::{Method, SongData, StringOrUnknown};

impl Method for AlbumData {
    const METHOD: &'static str = "album.getData";
}

impl Method for AlbumTracks {
    const METHOD: &'static str = "song.getListByAlbum";
}

#[derive(Clone, PartialEq, Eq, Deserialize, Debug, Default)]
pub struct AlbumData {
    #[serde(default)]
    #[serde(rename = "ALB_TITLE")]
    pub title: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ART_NAME")]
    pub artist: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ALB_PICTURE")]
    pub picture: String,
}

/// One track of an album listing. Listings carry the full song data.
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(transparent)]
pub struct AlbumTracks(pub SongData);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Request {
    #[serde(rename = "alb_id")]
    pub album_id: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct TracksRequest {
    #[serde(rename = "alb_id")]
    pub album_id: String,

    /// Number of tracks to list; `-1` lists all.
    #[serde(rename = "nb")]
    pub count: i64,
}
