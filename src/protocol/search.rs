//! Track search through Deezer's public API.
//!
//! Searching finds an equivalent recording when a track is unavailable.
//! A track with an ISRC is first looked up by it, which finds the same
//! recording under another release. Then queries use the advanced search
//! syntax, first including the album and then, if that yields nothing,
//! without it:
//!
//! ```text
//! artist:"Daft Punk" track:"One More Time" album:"Discovery"
//! artist:"Daft Punk" track:"One More Time"
//! ```

use serde::Deserialize;
use url::Url;

use crate::{
    catalog::SearchQuery,
    error::Result,
    track::TrackId,
};

/// Public API endpoint for track search.
pub const SEARCH_URL: &str = "https://api.deezer.com/search/track";

/// Public API endpoint for tracks by ISRC.
const ISRC_URL: &str = "https://api.deezer.com/track/isrc:";

/// Returns the lookup url of an ISRC, or `None` if it is malformed.
///
/// # Errors
///
/// Returns an error if the url cannot be built.
pub fn isrc_url(isrc: &str) -> Result<Option<Url>> {
    let isrc = isrc.trim();
    if isrc.is_empty() || !isrc.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(None);
    }

    let url = format!("{ISRC_URL}{}", isrc.to_ascii_uppercase());
    Ok(Some(url.parse()?))
}

/// A track from the ISRC lookup. Unknown codes answer with an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct IsrcTrack {
    #[serde(default)]
    pub id: TrackId,

    #[serde(default)]
    pub error: Option<ApiError>,
}

impl IsrcTrack {
    #[must_use]
    pub fn id(&self) -> Option<TrackId> {
        Some(self.id).filter(|id| self.error.is_none() && id.is_valid())
    }
}

/// Search results, best match first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub data: Vec<SearchHit>,

    #[serde(default)]
    pub total: u64,

    /// Set when the public API refused the query.
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SearchHit {
    pub id: TrackId,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: u64,
}

impl SearchResults {
    /// The best match that `query` does not exclude, if any.
    #[must_use]
    pub fn best(&self, query: &SearchQuery) -> Option<TrackId> {
        self.data
            .iter()
            .map(|hit| hit.id)
            .find(|id| id.is_valid() && !query.excludes(*id))
    }
}

/// Quotes a value for the advanced search syntax.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

/// Advanced search expressions to try, strictest first. None without
/// artist and title.
#[must_use]
pub fn queries(query: &SearchQuery) -> Vec<String> {
    if !query.has_metadata() {
        return Vec::new();
    }

    let loose = format!(
        "artist:{} track:{}",
        quote(&query.artist),
        quote(&query.title)
    );

    if query.album.is_empty() {
        vec![loose]
    } else {
        vec![format!("{loose} album:{}", quote(&query.album)), loose]
    }
}
