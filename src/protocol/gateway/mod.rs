//! Gateway API types for Deezer's web services.
//!
//! This module provides type-safe interfaces to the gateway endpoints the
//! downloader needs:
//! * User data and licence ([`user_data`])
//! * Track metadata and stream identity ([`song`])
//! * Album and playlist listings ([`album`], [`playlist`])
//! * Artist discographies and top tracks ([`artist`])
//!
//! # Number Handling
//!
//! The gateway sends most numbers as strings, but not consistently. Numeric
//! fields therefore accept both, through `PickFirst<(_, DisplayFromStr)>`.
//!
//! # Response Types
//!
//! The API returns two types of responses:
//! * Paginated lists ([`Response::Paginated`])
//! * Simple results ([`Response::Unpaginated`])
//!
//! Both carry an `error` field that is an empty list on success and a map of
//! error codes to messages on failure. Check it with [`Status`] before
//! parsing the results, because failed responses carry results of a
//! different shape.

pub mod album;
pub mod artist;
pub mod playlist;
pub mod song;
pub mod user_data;

pub use album::{AlbumData, AlbumTracks};
pub use artist::{ArtistData, ArtistTopTracks, DiscographyAlbum};
pub use playlist::{PlaylistData, PlaylistTracks};
pub use song::SongData;
pub use user_data::UserData;

use std::{convert::Infallible, ops::Deref, str::FromStr};

use serde::Deserialize;
use serde_with::serde_as;

/// Defines a gateway API method identifier.
///
/// Each type implementing this trait represents a specific Deezer gateway API
/// endpoint, identified by a method name string.
///
/// # Examples
///
/// ```rust
/// use dzdl::protocol::gateway::{Method, SongData};
///
/// assert_eq!(SongData::METHOD, "song.getData");
/// ```
pub trait Method {
    /// The gateway API method name, in Deezer's dot-notation.
    const METHOD: &'static str;
}

/// Error status of any gateway response.
///
/// The `error` field is an empty list on success, and a map of error codes
/// to messages on failure.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct Status {
    #[serde(default)]
    pub error: serde_json::Value,
}

impl Status {
    /// Returns the first error code and message, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<(&str, String)> {
        let errors = self.error.as_object()?;
        errors.iter().next().map(|(code, message)| {
            let message = match message {
                serde_json::Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            (code.as_str(), message)
        })
    }
}

/// Response from a Deezer gateway API endpoint.
///
/// Paginated format:
/// ```json
/// {
///     "error": [],
///     "results": {
///         "data": [...],
///         "count": 10,
///         "total": 100,
///         "filtered_count": 10
///     }
/// }
/// ```
///
/// Unpaginated format:
/// ```json
/// {
///     "error": [],
///     "results": {...}
/// }
/// ```
#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(untagged)]
pub enum Response<T> {
    /// Paginated response with result counts
    Paginated {
        #[serde(default)]
        error: serde_json::Value,
        results: Paginated<T>,
    },

    /// Direct response with results array
    Unpaginated {
        #[serde(default)]
        error: serde_json::Value,
        /// Result items (single item or array)
        #[serde_as(as = "serde_with::OneOrMany<_>")]
        results: Vec<T>,
    },
}

impl<T> Response<T> {
    /// Returns the first result item, if any.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.all().first()
    }

    /// Returns all result items as a slice.
    #[must_use]
    pub fn all(&self) -> &[T] {
        match self {
            Self::Paginated { results, .. } => &results.data,
            Self::Unpaginated { results, .. } => results,
        }
    }

    /// Consumes the response into its result items.
    #[must_use]
    pub fn into_all(self) -> Vec<T> {
        match self {
            Self::Paginated { results, .. } => results.data,
            Self::Unpaginated { results, .. } => results,
        }
    }
}

/// Paginated result set from the Deezer gateway API.
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Paginated<T> {
    /// Items in this page of results
    pub data: Vec<T>,
    /// Number of items in this page
    #[serde(default)]
    pub count: u64,
    /// Total number of items available
    #[serde(default)]
    pub total: u64,
    /// Number of items matching applied filters
    #[serde(default)]
    pub filtered_count: u64,
}

/// String value that defaults to "UNKNOWN" when absent.
///
/// Used for display fields of tracks and collections, so that a missing
/// artist or title still makes a readable file name.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Debug, Hash)]
pub struct StringOrUnknown(pub String);

impl Deref for StringOrUnknown {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for StringOrUnknown {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Default for StringOrUnknown {
    fn default() -> Self {
        Self(String::from("UNKNOWN"))
    }
}

impl From<StringOrUnknown> for String {
    fn from(value: StringOrUnknown) -> Self {
        value.0
    }
}
