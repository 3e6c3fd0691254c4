//! In-memory collaborators for the download engine.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use blowfish::{
    cipher::{BlockEncryptMut, KeyIvInit},
    Blowfish,
};
use bytes::Bytes;
use cbc::cipher::block_padding::NoPadding;
use futures_util::{stream, StreamExt};
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use dzdl::{
    catalog::{Catalog, SearchQuery},
    config::Config,
    decrypt::{key_for_track_id, CBC_BF_IV, CBC_BLOCK_SIZE, WINDOW_SIZE},
    error::{DownloadError, Error, Result},
    events::{Event, ItemState, Listener},
    http::{Probe, Response, Transport},
    protocol::media::Format,
    stream_url,
    track::{FileSize, Track, TrackId},
};

/// Size of the chunks the fake delivers bodies in. Not window aligned.
const CHUNK_SIZE: usize = 1000;

/// Recognizable payload without zero bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// Encrypts the first block of every full window, as the CDN does.
pub fn encrypt(plain: &[u8], track_id: TrackId) -> Vec<u8> {
    let key = key_for_track_id(track_id);
    let mut data = plain.to_vec();
    for window in data.chunks_mut(WINDOW_SIZE) {
        if window.len() >= CBC_BLOCK_SIZE {
            let cipher = cbc::Encryptor::<Blowfish>::new_from_slices(&*key, CBC_BF_IV).unwrap();
            cipher
                .encrypt_padded_mut::<NoPadding>(&mut window[..CBC_BLOCK_SIZE], CBC_BLOCK_SIZE)
                .unwrap();
        }
    }
    data
}

/// Fast retries, so that tests do not wait on the backoff.
pub fn config(location: &std::path::Path) -> Config {
    let mut config = Config::new().unwrap();
    config.download_location = location.to_path_buf();
    config.retry_min = std::time::Duration::from_millis(1);
    config.retry_max = std::time::Duration::from_millis(5);
    config
}

/// A remote asset.
#[derive(Clone, Debug)]
pub enum Asset {
    /// Served from memory. The next `faults` fetches break off with a
    /// transient error once they reach `cut_at` bytes.
    Bytes {
        data: Bytes,
        faults: usize,
        cut_at: usize,
    },
    /// Always answers with this status.
    Status(StatusCode),
    /// Looks available, but every fetch fails with an interrupted read.
    Interrupted(u64),
}

#[derive(Default)]
pub struct FakeTransport {
    assets: Mutex<HashMap<Url, Asset>>,
    /// Offsets of all fetches, in order.
    pub fetches: Mutex<Vec<u64>>,
    pub probes: AtomicUsize,
    /// Servers that ignore range requests answer `200` from the start.
    pub ignore_ranges: bool,
    /// Cut bodies end without an error, short of their content length.
    pub clean_cuts: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: Url, asset: Asset) {
        self.assets.lock().unwrap().insert(url, asset);
    }

    /// Serves `plain` for a track at a format, encrypted like the CDN.
    pub fn serve(&self, track: &Track, format: Format, plain: &[u8]) -> Url {
        let url = stream_url::url_for(track, format).unwrap();
        self.insert(
            url.clone(),
            Asset::Bytes {
                data: Bytes::from(encrypt(plain, track.id)),
                faults: 0,
                cut_at: 0,
            },
        );
        url
    }

    pub fn refuse(&self, track: &Track, format: Format, status: StatusCode) {
        let url = stream_url::url_for(track, format).unwrap();
        self.insert(url, Asset::Status(status));
    }
}

impl Transport for FakeTransport {
    async fn probe(&self, url: &Url) -> Result<Probe> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let asset = self.assets.lock().unwrap().get(url).cloned();
        Ok(match asset {
            Some(Asset::Bytes { data, .. }) if !data.is_empty() => Probe::Available(data.len() as u64),
            Some(Asset::Interrupted(size)) => Probe::Available(size),
            Some(Asset::Status(StatusCode::FORBIDDEN)) => Probe::Forbidden,
            Some(Asset::Status(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)) => Probe::GeoBlocked,
            _ => Probe::Missing,
        })
    }

    async fn fetch(&self, url: &Url, offset: u64) -> Result<Response> {
        self.fetches.lock().unwrap().push(offset);

        let (data, cut) = {
            let mut assets = self.assets.lock().unwrap();
            match assets.get_mut(url) {
                Some(Asset::Bytes {
                    data,
                    faults,
                    cut_at,
                }) => {
                    let cut = (*faults > 0).then(|| {
                        *faults -= 1;
                        *cut_at
                    });
                    (data.clone(), cut)
                }
                Some(Asset::Interrupted(_)) => {
                    return Err(Error::cancelled("operation interrupted"));
                }
                Some(Asset::Status(status)) => {
                    return Ok(Response {
                        status: *status,
                        content_length: None,
                        body: stream::empty().boxed(),
                    })
                }
                None => {
                    return Ok(Response {
                        status: StatusCode::NOT_FOUND,
                        content_length: None,
                        body: stream::empty().boxed(),
                    })
                }
            }
        };

        let (status, start) = if offset > 0 && !self.ignore_ranges {
            (StatusCode::PARTIAL_CONTENT, offset as usize)
        } else {
            (StatusCode::OK, 0)
        };
        let content_length = Some((data.len() - start) as u64);

        let end = cut.map_or(data.len(), |cut| cut.clamp(start, data.len()));
        let mut chunks: Vec<Result<Bytes>> = data
            .slice(start..end)
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if cut.is_some() && !self.clean_cuts {
            chunks.push(Err(Error::aborted("connection reset by peer")));
        }

        Ok(Response {
            status,
            content_length,
            body: stream::iter(chunks).boxed(),
        })
    }
}

/// A catalog of tracks and search answers.
#[derive(Default)]
pub struct FakeCatalog {
    tracks: Mutex<HashMap<TrackId, Track>>,
    searches: Mutex<HashMap<String, TrackId>>,
    /// All queries, in order.
    pub queries: Mutex<Vec<SearchQuery>>,
    pub lookups: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: Track) {
        self.tracks.lock().unwrap().insert(track.id, track);
    }

    /// Makes a search for `title` find `id`.
    pub fn answer(&self, title: &str, id: TrackId) {
        self.searches.lock().unwrap().insert(title.to_owned(), id);
    }
}

impl Catalog for FakeCatalog {
    async fn track(&self, id: TrackId) -> Result<Track> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tracks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DownloadError::NotOnDeezer.into())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Option<TrackId>> {
        self.queries.lock().unwrap().push(query.clone());
        let found = self.searches.lock().unwrap().get(&query.title).copied();
        Ok(found.filter(|id| !query.excludes(*id)))
    }
}

/// Builds an encoded track with known sizes for some formats.
pub fn track(id: i64, sizes: &[(Format, u64)]) -> Track {
    let mut track = Track {
        id: TrackId(id),
        md5_origin: format!("{:032x}", id.unsigned_abs() * 7919),
        media_version: 3,
        title: format!("Title {id}"),
        artist: String::from("Artist"),
        album: String::from("Album"),
        ..Default::default()
    };
    for (format, size) in sizes {
        track.filesizes.insert(
            *format,
            FileSize {
                size: *size,
                tested: false,
            },
        );
    }
    track
}

/// Records all events.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
    /// Cancelled when a track starts downloading, if set.
    pub cancel_on_download: Option<CancellationToken>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }
}

impl Listener for Recorder {
    fn send(&self, event: Event) {
        if let (
            Some(token),
            Event::State {
                state: ItemState::Downloading,
                ..
            },
        ) = (&self.cancel_on_download, &event)
        {
            token.cancel();
        }
        self.events.lock().unwrap().push(event);
    }
}
