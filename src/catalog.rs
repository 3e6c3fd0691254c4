//! Metadata boundary of the download engine.
//!
//! The engine only needs to look tracks up by id and to find a substitute
//! recording by metadata. [`Gateway`](crate::gateway::Gateway) implements
//! this against Deezer; tests use in-memory fakes.

use std::future::Future;

use crate::{
    error::Result,
    track::{Track, TrackId},
};

/// Metadata used to find an equivalent recording.
///
/// The ISRC identifies a recording exactly and is tried first. Artist,
/// title and album are matched after that.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SearchQuery {
    pub isrc: Option<String>,
    pub artist: String,
    pub title: String,
    pub album: String,
    /// Tracks that must not match, such as recordings already tried.
    pub exclude: Vec<TrackId>,
}

impl From<&Track> for SearchQuery {
    fn from(track: &Track) -> Self {
        Self {
            isrc: track.isrc.clone(),
            artist: track.artist.clone(),
            title: track.title.clone(),
            album: track.album.clone(),
            exclude: vec![track.id],
        }
    }
}

impl SearchQuery {
    /// Whether artist and title are known.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        !self.artist.is_empty() && !self.title.is_empty()
    }

    /// Whether the query holds enough to search with.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.isrc.is_none() && !self.has_metadata()
    }

    #[must_use]
    pub fn excludes(&self, id: TrackId) -> bool {
        self.exclude.contains(&id)
    }
}

pub trait Catalog: Send + Sync {
    /// Looks up a track with its content hash, media version, fallback id
    /// and display metadata.
    fn track(&self, id: TrackId) -> impl Future<Output = Result<Track>> + Send;

    /// Finds the best matching track, if any.
    fn search(&self, query: &SearchQuery) -> impl Future<Output = Result<Option<TrackId>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_carry_the_recording() {
        let track = Track {
            id: TrackId(3_135_556),
            isrc: Some("GBDUW0000059".into()),
            artist: "Daft Punk".into(),
            title: "Harder, Better, Faster, Stronger".into(),
            ..Default::default()
        };

        let query = SearchQuery::from(&track);
        assert_eq!(query.isrc.as_deref(), Some("GBDUW0000059"));
        assert!(query.excludes(TrackId(3_135_556)));
        assert!(query.has_metadata());
        assert!(!query.is_empty());

        let isrc_only = SearchQuery {
            artist: String::new(),
            ..query
        };
        assert!(!isrc_only.has_metadata());
        assert!(!isrc_only.is_empty());

        let nothing = SearchQuery {
            isrc: None,
            ..isrc_only
        };
        assert!(nothing.is_empty());
    }
}
