//! Artists from the `artist.getData`, `artist.getTopTrack` and
//! `album.getDiscography` gateway methods.
//!
//! An artist downloads as the albums of its discography, or as a
//! playlist of its top tracks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use super::{Method, SongData, StringOrUnknown};

/// Releases to list per discography call.
pub const PAGE_SIZE: usize = 100;

/// Number of top tracks to list.
pub const TOP_TRACKS: usize = 100;

impl Method for ArtistData {
    const METHOD: &'static str = "artist.getData";
}

impl Method for ArtistTopTracks {
    const METHOD: &'static str = "artist.getTopTrack";
}

impl Method for DiscographyAlbum {
    const METHOD: &'static str = "album.getDiscography";
}

#[derive(Clone, PartialEq, Eq, Deserialize, Debug, Default)]
pub struct ArtistData {
    #[serde(default)]
    #[serde(rename = "ART_NAME")]
    pub name: StringOrUnknown,
}

/// One of the top tracks of an artist, with the full song data.
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(transparent)]
pub struct ArtistTopTracks(pub SongData);

/// A release in the discography of an artist.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Deserialize, Debug, Default)]
pub struct DiscographyAlbum {
    #[serde(rename = "ALB_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub album_id: u64,

    /// Main artist of the release.
    #[serde(default)]
    #[serde(rename = "ART_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub artist_id: u64,

    /// Role of the artist on the release: `0` is main artist.
    #[serde(default)]
    #[serde(rename = "ROLE_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub role_id: u64,

    #[serde(default)]
    #[serde(rename = "ALB_TITLE")]
    pub title: StringOrUnknown,
}

impl DiscographyAlbum {
    /// Whether the release is by the artist, rather than one it features on.
    #[must_use]
    pub fn is_main(&self, artist_id: u64) -> bool {
        self.artist_id == artist_id || self.role_id == 0
    }
}

/// Album ids to download for an artist, in discography order and without
/// duplicates. With `main_only`, releases the artist only features on are
/// left out.
#[must_use]
pub fn releases(artist_id: u64, discography: &[DiscographyAlbum], main_only: bool) -> Vec<u64> {
    let mut seen = HashSet::new();
    discography
        .iter()
        .filter(|release| !main_only || release.is_main(artist_id))
        .map(|release| release.album_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Request {
    #[serde(rename = "art_id")]
    pub artist_id: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct TopTracksRequest {
    #[serde(rename = "art_id")]
    pub artist_id: String,

    #[serde(rename = "nb")]
    pub count: usize,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct DiscographyRequest {
    #[serde(rename = "art_id")]
    pub artist_id: String,

    pub discography_mode: &'static str,

    #[serde(rename = "nb")]
    pub count: usize,

    /// Tracks to list per release; none, as albums are listed on their own.
    pub nb_songs: usize,

    pub start: usize,
}

impl DiscographyRequest {
    /// Requests the page of releases starting at `start`.
    #[must_use]
    pub fn page(artist_id: &str, start: usize) -> Self {
        Self {
            artist_id: artist_id.to_owned(),
            discography_mode: "all",
            count: PAGE_SIZE,
            nb_songs: 0,
            start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::gateway::Response;

    const DISCOGRAPHY: &str = r#"{
        "error": [],
        "results": {
            "data": [
                {"ALB_ID": "302127", "ART_ID": "27", "ROLE_ID": "0", "ALB_TITLE": "Discovery"},
                {"ALB_ID": "301775", "ART_ID": "27", "ROLE_ID": 0, "ALB_TITLE": "Homework"},
                {"ALB_ID": "302127", "ART_ID": "27", "ROLE_ID": "0", "ALB_TITLE": "Discovery"},
                {"ALB_ID": "6575789", "ART_ID": "4050205", "ROLE_ID": "5", "ALB_TITLE": "Starboy"}
            ],
            "count": 4,
            "total": 4,
            "filtered_count": 0
        }
    }"#;

    #[test]
    fn selects_releases() {
        let response: Response<DiscographyAlbum> = serde_json::from_str(DISCOGRAPHY).unwrap();
        let discography = response.into_all();

        assert_eq!(releases(27, &discography, true), [302_127, 301_775]);
        assert_eq!(
            releases(27, &discography, false),
            [302_127, 301_775, 6_575_789]
        );
    }

    #[test]
    fn requests_pages_without_songs() {
        assert_eq!(
            serde_json::to_string(&DiscographyRequest::page("27", 100)).unwrap(),
            r#"{"art_id":"27","discography_mode":"all","nb":100,"nb_songs":0,"start":100}"#
        );
    }
}
