//! Album artwork retrieval.
//!
//! Tracks of one album share their artwork. The [`ArtworkCache`] makes sure
//! that concurrent requests for the same image collapse into a single
//! fetch, and that later requests are served from memory.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    error::{Error, Result},
    http::Transport,
};

/// Returns the CDN url of an album cover, or `None` without a picture hash.
///
/// # Errors
///
/// Returns an error if the hash does not make a valid url.
pub fn cover_url(picture: &str, size: u32) -> Result<Option<Url>> {
    if picture.is_empty() {
        return Ok(None);
    }

    let url = format!(
        "https://e-cdns-images.dzcdn.net/images/cover/{picture}/{size}x{size}-000000-80-0-0.jpg"
    );
    Ok(Some(url.parse()?))
}

type Cell = Arc<OnceCell<Option<Bytes>>>;

#[derive(Debug, Default)]
pub struct ArtworkCache {
    cells: Mutex<HashMap<Url, Cell>>,
}

impl ArtworkCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the image at `url`, fetching it at most once.
    ///
    /// A failed fetch is logged and cached as missing artwork: downloads
    /// do not fail for lack of a cover.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub async fn get<T>(&self, transport: &T, url: &Url) -> Result<Option<Bytes>>
    where
        T: Transport,
    {
        let cell = {
            let mut cells = self.cells.lock()?;
            Arc::clone(cells.entry(url.clone()).or_default())
        };

        let artwork = cell
            .get_or_init(|| async {
                match fetch(transport, url).await {
                    Ok(artwork) => Some(artwork),
                    Err(e) => {
                        warn!("could not get artwork {url}: {e}");
                        None
                    }
                }
            })
            .await;

        Ok(artwork.clone())
    }
}

async fn fetch<T>(transport: &T, url: &Url) -> Result<Bytes>
where
    T: Transport,
{
    let response = transport.fetch(url, 0).await?;
    if !response.status.is_success() {
        return Err(Error::not_found(format!(
            "artwork returned {}",
            response.status
        )));
    }

    let artwork = response
        .body
        .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
            buffer.extend_from_slice(&chunk);
            Ok(buffer)
        })
        .await?;

    Ok(artwork.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_cover_urls() {
        let url = cover_url("2e018122cb56986277102d2041a592c8", 800)
            .unwrap()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://e-cdns-images.dzcdn.net/images/cover/2e018122cb56986277102d2041a592c8/800x800-000000-80-0-0.jpg"
        );
        assert!(cover_url("", 800).unwrap().is_none());
    }
}
