//! Parsing of Deezer links into downloadable objects.
//!
//! Accepts the links that the Deezer web player and share dialogs produce,
//! with or without a locale segment and query string:
//!
//! ```text
//! https://www.deezer.com/track/3135556
//! https://www.deezer.com/en/album/302127?utm_source=share
//! https://deezer.com/playlist/908622995/
//! https://www.deezer.com/artist/27/top_track
//! ```
//!
//! Short links (`https://deezer.page.link/...`) redirect to one of these.
//! They are resolved by [`Gateway::link`](crate::gateway::Gateway::link).

use std::fmt;

use regex_lite::Regex;
use url::Url;

use crate::error::{Error, Result};

/// Host of the share link shortener.
const SHORT_LINK_HOST: &str = "deezer.page.link";

/// What a link points to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LinkKind {
    Track,
    Album,
    Playlist,
    /// The releases of an artist.
    Artist,
    /// The releases of an artist, and those it features on.
    Discography,
    /// The most popular tracks of an artist.
    TopTracks,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Track => f.write_str("track"),
            Self::Album => f.write_str("album"),
            Self::Playlist => f.write_str("playlist"),
            Self::Artist => f.write_str("artist"),
            Self::Discography => f.write_str("discography"),
            Self::TopTracks => f.write_str("top tracks"),
        }
    }
}

/// A parsed link: what kind of object it points to, and its id.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Link {
    pub kind: LinkKind,
    pub id: String,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Path patterns in order of precedence.
const PATTERNS: [(&str, LinkKind); 6] = [
    (r"/track/(\d+)$", LinkKind::Track),
    (r"/playlist/(\d+)$", LinkKind::Playlist),
    (r"/album/(\d+)$", LinkKind::Album),
    (r"/artist/(\d+)/top_track$", LinkKind::TopTracks),
    (r"/artist/(\d+)/discography$", LinkKind::Discography),
    (r"/artist/(\d+)$", LinkKind::Artist),
];

impl Link {
    /// Parses a Deezer link.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the link is not a Deezer link or does
    /// not point to something downloadable.
    pub fn parse(link: &str) -> Result<Self> {
        let link = link.trim();

        // Everything after `?` or `&` is tracking noise.
        let stripped = link.split(['?', '&']).next().unwrap_or_default();
        let stripped = stripped.trim_end_matches('/');

        if !stripped.contains("deezer") {
            return Err(Error::invalid_argument(format!(
                "{link} is not a Deezer link"
            )));
        }

        for (pattern, kind) in PATTERNS {
            let regex = Regex::new(pattern).map_err(Error::internal)?;
            if let Some(id) = regex.captures(stripped).and_then(|captures| captures.get(1)) {
                return Ok(Self {
                    kind,
                    id: id.as_str().to_owned(),
                });
            }
        }

        Err(Error::invalid_argument(format!(
            "{link} does not point to a track, album, playlist or artist"
        )))
    }

    /// Whether `link` is a short link that must be followed first.
    #[must_use]
    pub fn is_short(link: &str) -> bool {
        Url::parse(link.trim())
            .is_ok_and(|url| url.host_str() == Some(SHORT_LINK_HOST))
    }
}

impl std::str::FromStr for Link {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_tracks_albums_and_playlists() {
        assert_eq!(
            Link::parse("https://www.deezer.com/track/3135556").unwrap(),
            Link {
                kind: LinkKind::Track,
                id: "3135556".into()
            }
        );
        assert_eq!(
            Link::parse("https://www.deezer.com/en/album/302127?utm_source=share&x=1").unwrap(),
            Link {
                kind: LinkKind::Album,
                id: "302127".into()
            }
        );
        assert_eq!(
            "https://deezer.com/playlist/908622995/"
                .parse::<Link>()
                .unwrap(),
            Link {
                kind: LinkKind::Playlist,
                id: "908622995".into()
            }
        );
    }

    #[test]
    fn parses_artist_links() {
        let kind = |link: &str| Link::parse(link).map(|link| (link.kind, link.id));

        assert_eq!(
            kind("https://www.deezer.com/fr/artist/27").unwrap(),
            (LinkKind::Artist, "27".into())
        );
        assert_eq!(
            kind("https://www.deezer.com/artist/27/discography/").unwrap(),
            (LinkKind::Discography, "27".into())
        );
        assert_eq!(
            kind("https://www.deezer.com/artist/27/top_track?utm_source=share").unwrap(),
            (LinkKind::TopTracks, "27".into())
        );
    }

    #[test]
    fn rejects_foreign_and_unsupported_links() {
        let foreign = Link::parse("https://example.com/track/1").unwrap_err();
        assert_eq!(foreign.kind, ErrorKind::InvalidArgument);

        let show = Link::parse("https://www.deezer.com/show/1234").unwrap_err();
        assert_eq!(show.kind, ErrorKind::InvalidArgument);

        assert!(Link::parse("https://www.deezer.com/track/abc").is_err());
        assert!(Link::parse("https://www.deezer.com/artist/27/radio").is_err());
    }

    #[test]
    fn recognizes_short_links() {
        assert!(Link::is_short("https://deezer.page.link/uKHuGxzi2a6i1dLW8"));
        assert!(Link::is_short(" https://deezer.page.link/abc "));
        assert!(!Link::is_short("https://www.deezer.com/track/3135556"));
        assert!(!Link::is_short("deezer.page.link"));
    }
}
