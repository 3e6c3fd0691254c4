//! Client of the Deezer gateway.
//!
//! The gateway is the private JSON-RPC style API that the Deezer web player
//! uses. Calls are authenticated by the `arl` cookie and, after the first
//! call, by the API token from the user data.
//!
//! [`Gateway`] turns links into [`DownloadObject`]s and is the [`Catalog`]
//! of the download engine. Track data that arrives with an album or
//! playlist listing is kept until the engine asks for it, so that
//! downloading a collection does not look up each track again. What the
//! engine never asks for is dropped by [`Gateway::forget`] once the
//! collection is done.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Catalog, SearchQuery},
    config::Config,
    error::{DownloadError, Error, Result},
    http::Client as HttpClient,
    item::{DownloadObject, Kind},
    link::{Link, LinkKind},
    protocol::{
        self,
        gateway::{
            self, album, artist, playlist, song, AlbumData, AlbumTracks, ArtistData,
            ArtistTopTracks, DiscographyAlbum, Method, PlaylistData, PlaylistTracks, SongData,
            Status, UserData,
        },
        media::Format,
        search::{self, IsrcTrack, SearchResults},
    },
    resolver::License,
    track::{Track, TrackId},
};

pub struct Gateway {
    http_client: HttpClient,
    user_data: Option<UserData>,
    client_id: usize,

    /// Tracks from collection listings, by id.
    listed: Mutex<HashMap<TrackId, Track>>,
}

impl Gateway {
    /// The URL of the Deezer cookie origin.
    ///
    /// What matters is that the domain matches with `deezer.com`.
    const COOKIE_ORIGIN: &'static str = "https://www.deezer.com";

    /// The URL of the Deezer gateway.
    const GATEWAY_URL: &'static str = "https://www.deezer.com/ajax/gw-light.php";

    /// The Deezer gateway version.
    const GATEWAY_VERSION: &'static str = "1.0";

    /// The Deezer gateway input type.
    const GATEWAY_INPUT: usize = 3;

    /// The `Content-Type` header value for the Deezer gateway requests.
    ///
    /// Although the bodies of all gateway requests are JSON, the
    /// `Content-Type` is not.
    const PLAIN_TEXT_CONTENT: HeaderValue = HeaderValue::from_static("text/plain;charset=UTF-8");

    /// An empty JSON object that is used as the default body for the Deezer
    /// API gateway requests.
    const EMPTY_JSON_OBJECT: &'static str = "{}";

    /// Number of tracks to request from listings: all of them.
    const ALL_TRACKS: i64 = -1;

    /// Creates a new `reqwest::cookie::Jar` containing the necessary cookies
    /// for the Deezer API.
    fn cookie_jar(config: &Config) -> Result<reqwest::cookie::Jar> {
        let cookie_jar = reqwest::cookie::Jar::default();
        let cookie_origin = reqwest::Url::parse(Self::COOKIE_ORIGIN)?;

        let lang_cookie = format!(
            "dz_lang={}; Domain=deezer.com; Path=/; Secure; HttpOnly",
            &config.app_lang
        );
        cookie_jar.add_cookie_str(&lang_cookie, &cookie_origin);

        if let Some(ref arl) = config.arl {
            let arl_cookie = format!(
                "arl={}; Domain=deezer.com; Path=/; Secure; HttpOnly",
                arl.as_str()
            );
            cookie_jar.add_cookie_str(&arl_cookie, &cookie_origin);
        }

        Ok(cookie_jar)
    }

    /// Creates a gateway client. Call [`refresh`](Self::refresh) before use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - no valid cookies can be created out of the `arl` and/or `config` fields
    /// - the HTTP client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let cookie_jar = Self::cookie_jar(config)?;
        let http_client = HttpClient::with_cookies(config, cookie_jar)?;

        Ok(Self {
            http_client,
            user_data: None,
            client_id: fastrand::usize(100_000_000..1_000_000_000),
            listed: Mutex::new(HashMap::new()),
        })
    }

    /// Signs in with the `arl` and fetches the API token and licence.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the `arl` is invalid or expired
    /// - the HTTP request failed
    pub async fn refresh(&mut self) -> Result<()> {
        let response = match self.request::<UserData>(Self::EMPTY_JSON_OBJECT).await {
            Ok(response) => response,
            Err(e) if e.kind == crate::error::ErrorKind::InvalidArgument => {
                // For an invalid or expired `arl`, the response has some
                // fields as integer `0` which are normally typed as string,
                // which causes JSON deserialization to fail.
                return Err(Error::unauthenticated(format!(
                    "{e}: please refresh your arl"
                )));
            }
            Err(e) => return Err(e),
        };

        let data = response
            .into_all()
            .into_iter()
            .next()
            .ok_or_else(|| Error::unavailable("no user data received"))?;

        if !data.is_logged_in() {
            return Err(Error::unauthenticated(
                "arl is invalid or expired: please refresh your arl",
            ));
        }

        debug!(
            "signed in as {} with licence {:?}",
            data.user.name,
            License::from(&data.user.options)
        );
        self.user_data = Some(data);
        Ok(())
    }

    /// Calls a gateway method.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the HTTP request fails
    /// - the gateway reports an error
    /// - the response cannot be parsed
    pub async fn request<T>(&self, body: impl Into<reqwest::Body>) -> Result<gateway::Response<T>>
    where
        T: std::fmt::Debug + Method + for<'de> Deserialize<'de>,
    {
        // Get the API token from the user data or use an empty string.
        let api_token = self
            .user_data
            .as_ref()
            .map(|data| data.api_token.as_str())
            .unwrap_or_default();

        // Check the URL early to not needlessly hit the rate limiter.
        let url_str = format!(
            "{}?method={}&input={}&api_version={}&api_token={api_token}&cid={}",
            Self::GATEWAY_URL,
            T::METHOD,
            Self::GATEWAY_INPUT,
            Self::GATEWAY_VERSION,
            self.client_id,
        );
        let url = url_str.parse::<reqwest::Url>()?;
        let mut request = self.http_client.post(url, body);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::PLAIN_TEXT_CONTENT)?;

        let response = self.http_client.execute(request).await?;
        let body = response.text().await?;

        let status: Status = protocol::json(&body, T::METHOD)?;
        if let Some((code, message)) = status.error() {
            return Err(Self::gateway_error(code, message));
        }

        protocol::json(&body, T::METHOD)
    }

    /// Calls a gateway method with a JSON request body.
    async fn call<T, R>(&self, request: &R) -> Result<gateway::Response<T>>
    where
        T: std::fmt::Debug + Method + for<'de> Deserialize<'de>,
        R: Serialize,
    {
        let body = serde_json::to_string(request)?;
        self.request::<T>(body).await
    }

    fn gateway_error(code: &str, message: String) -> Error {
        let message = format!("{code}: {message}");
        match code {
            "VALID_TOKEN_REQUIRED" | "NEED_USER_AUTH_REQUIRED" => Error::unauthenticated(message),
            "DATA_ERROR" => Error::not_found(message),
            "REQUEST_ERROR" | "PARAMETER_ERROR" => Error::invalid_argument(message),
            "QUOTA_ERROR" => Error::resource_exhausted(message),
            _ => Error::unknown(message),
        }
    }

    #[must_use]
    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// What the signed-in account may stream.
    #[must_use]
    pub fn license(&self) -> License {
        self.user_data
            .as_ref()
            .map(|data| License::from(&data.user.options))
            .unwrap_or_default()
    }

    /// Parses a link, following it first if it is a short link.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the short link cannot be followed, or the link
    /// does not point to anything downloadable.
    pub async fn link(&self, link: &str) -> Result<Link> {
        if !Link::is_short(link) {
            return Link::parse(link);
        }

        let url = link.trim().parse::<reqwest::Url>()?;
        let request = self.http_client.get(url, "");
        let response = self.http_client.execute(request).await?;
        let target = response.url();
        debug!("{} redirects to {target}", link.trim());

        Link::parse(target.as_str())
    }

    /// Resolves a link into download objects: one for a track, album,
    /// playlist or top tracks, and one per album for an artist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the object does not exist or cannot be fetched.
    pub async fn objects(&self, link: &Link, format: Format) -> Result<Vec<DownloadObject>> {
        let object = match link.kind {
            LinkKind::Track => self.single(&link.id, format).await?,
            LinkKind::Album => self.album(&link.id, format).await?,
            LinkKind::Playlist => self.playlist(&link.id, format).await?,
            LinkKind::TopTracks => self.top_tracks(&link.id, format).await?,
            LinkKind::Artist => return self.discography(&link.id, format, true).await,
            LinkKind::Discography => return self.discography(&link.id, format, false).await,
        };

        Ok(vec![object])
    }

    async fn single(&self, id: &str, format: Format) -> Result<DownloadObject> {
        let id: TrackId = id.parse()?;
        let track = self.track(id).await?;
        let object =
            DownloadObject::single(id, format).with_title(track.title.clone(), track.artist.clone());
        self.remember([track]);
        Ok(object)
    }

    /// Lists an album. A single-track album downloads as a track.
    ///
    /// # Errors
    ///
    /// Will return [`DownloadError::AlbumDoesntExist`] if the album is not
    /// found, or `Err` if it cannot be fetched.
    pub async fn album(&self, id: &str, format: Format) -> Result<DownloadObject> {
        let data = self
            .call::<AlbumData, _>(&album::Request {
                album_id: id.to_owned(),
            })
            .await
            .map_err(Self::album_error)?
            .into_all()
            .into_iter()
            .next()
            .ok_or(DownloadError::AlbumDoesntExist)?;

        let tracks = self
            .call::<AlbumTracks, _>(&album::TracksRequest {
                album_id: id.to_owned(),
                count: Self::ALL_TRACKS,
            })
            .await
            .map_err(Self::album_error)?
            .into_all()
            .into_iter()
            .map(|listed| listed.0);

        self.collection(Kind::Album, id, format, tracks)
            .map(|object| object.with_title(data.title.0, data.artist.0))
    }

    /// Lists a playlist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the playlist is not found or cannot be fetched.
    pub async fn playlist(&self, id: &str, format: Format) -> Result<DownloadObject> {
        let data = self
            .call::<PlaylistData, _>(&playlist::Request {
                playlist_id: id.to_owned(),
            })
            .await?
            .into_all()
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("playlist {id} not found")))?;

        let tracks = self
            .call::<PlaylistTracks, _>(&playlist::TracksRequest {
                playlist_id: id.to_owned(),
                count: Self::ALL_TRACKS,
            })
            .await?
            .into_all()
            .into_iter()
            .map(|listed| listed.0);

        self.collection(Kind::Playlist, id, format, tracks)
            .map(|object| object.with_title(data.title.0, data.creator.0))
    }

    async fn artist(&self, id: &str) -> Result<ArtistData> {
        self.call::<ArtistData, _>(&artist::Request {
            artist_id: id.to_owned(),
        })
        .await?
        .into_all()
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("artist {id} not found")))
    }

    /// Lists the top tracks of an artist as a playlist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the artist is not found or cannot be fetched.
    pub async fn top_tracks(&self, id: &str, format: Format) -> Result<DownloadObject> {
        let name = self.artist(id).await?.name.0;

        let tracks = self
            .call::<ArtistTopTracks, _>(&artist::TopTracksRequest {
                artist_id: id.to_owned(),
                count: artist::TOP_TRACKS,
            })
            .await?
            .into_all()
            .into_iter()
            .map(|listed| listed.0);

        self.collection(Kind::Playlist, &format!("{id}_top_track"), format, tracks)
            .map(|object| object.with_title(format!("{name} - Top Tracks"), name))
    }

    /// Lists the albums of an artist. With `main_only`, releases that the
    /// artist only features on are left out. Albums that cannot be listed
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the discography cannot be fetched.
    pub async fn discography(
        &self,
        id: &str,
        format: Format,
        main_only: bool,
    ) -> Result<Vec<DownloadObject>> {
        let artist_id: u64 = id.parse()?;

        let mut discography: Vec<DiscographyAlbum> = Vec::new();
        loop {
            let page = self
                .call::<DiscographyAlbum, _>(&artist::DiscographyRequest::page(
                    id,
                    discography.len(),
                ))
                .await?
                .into_all();
            let last = page.len() < artist::PAGE_SIZE;
            discography.extend(page);
            if last {
                break;
            }
        }

        let releases = artist::releases(artist_id, &discography, main_only);
        debug!("artist {id} has {} releases", releases.len());

        let mut objects = Vec::with_capacity(releases.len());
        for album_id in releases {
            match self.album(&album_id.to_string(), format).await {
                Ok(object) => objects.push(object),
                Err(e) => warn!("artist {id}: skipping album {album_id}: {e}"),
            }
        }

        Ok(objects)
    }

    fn collection(
        &self,
        kind: Kind,
        id: &str,
        format: Format,
        listing: impl Iterator<Item = SongData>,
    ) -> Result<DownloadObject> {
        let tracks: Vec<Track> = listing
            .enumerate()
            .map(|(index, data)| {
                let mut track = Track::from(data);
                track.position = Some(index + 1);
                track
            })
            .collect();

        if kind == Kind::Album {
            if let [track] = tracks.as_slice() {
                debug!("album {id} has a single track, downloading it as a track");
                let object = DownloadObject::single(track.id, format)
                    .with_title(track.title.clone(), track.artist.clone());
                self.remember(tracks);
                return Ok(object);
            }
        }

        let ids = tracks.iter().map(|track| track.id).collect();
        self.remember(tracks);
        Ok(DownloadObject::collection(kind, id, format, ids))
    }

    fn remember(&self, tracks: impl IntoIterator<Item = Track>) {
        self.listed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tracks.into_iter().map(|track| (track.id, track)));
    }

    /// Drops the listed data of tracks of `object` that were never looked
    /// up, for instance because the object was cancelled.
    pub fn forget(&self, object: &DownloadObject) {
        let mut listed = self.listed.lock().unwrap_or_else(PoisonError::into_inner);
        for id in object.tracks() {
            listed.remove(id);
        }
    }

    fn album_error(e: Error) -> Error {
        if e.kind == crate::error::ErrorKind::NotFound {
            DownloadError::AlbumDoesntExist.into()
        } else {
            e
        }
    }

    async fn lookup(&self, id: TrackId) -> Result<Track> {
        let data = self
            .call::<SongData, _>(&song::Request { track_id: id })
            .await
            .map_err(|e| {
                if e.kind == crate::error::ErrorKind::NotFound {
                    DownloadError::NotOnDeezer.into()
                } else {
                    e
                }
            })?
            .into_all()
            .into_iter()
            .next()
            .ok_or(DownloadError::NotOnDeezer)?;

        Ok(Track::from(data))
    }

    async fn search_public(&self, query: &str) -> Result<SearchResults> {
        let mut url = reqwest::Url::parse(search::SEARCH_URL)?;
        url.query_pairs_mut().append_pair("q", query);

        let request = self.http_client.get(url, "");
        let response = self.http_client.execute(request).await?;
        let body = response.text().await?;

        let results: SearchResults = protocol::json(&body, "search")?;
        if let Some(error) = &results.error {
            return Err(Error::unavailable(format!(
                "search failed: {} ({})",
                error.message, error.kind
            )));
        }

        Ok(results)
    }

    async fn search_isrc(&self, isrc: &str) -> Result<Option<TrackId>> {
        let Some(url) = search::isrc_url(isrc)? else {
            return Ok(None);
        };

        let request = self.http_client.get(url, "");
        let response = self.http_client.execute(request).await?;
        let body = response.text().await?;

        let track: IsrcTrack = protocol::json(&body, "isrc")?;
        Ok(track.id())
    }
}

impl Catalog for Gateway {
    async fn track(&self, id: TrackId) -> Result<Track> {
        if !id.is_valid() {
            return Err(DownloadError::NotOnDeezer.into());
        }

        let listed = self
            .listed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match listed {
            Some(track) => Ok(track),
            None => self.lookup(id).await,
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Option<TrackId>> {
        if let Some(isrc) = &query.isrc {
            match self.search_isrc(isrc).await {
                Ok(Some(id)) if !query.excludes(id) => {
                    trace!("isrc {isrc} matched {id}");
                    return Ok(Some(id));
                }
                Ok(_) => {}
                Err(e) => debug!("isrc {isrc} lookup failed: {e}"),
            }
        }

        for expression in search::queries(query) {
            let results = self.search_public(&expression).await?;
            if let Some(id) = results.best(query) {
                trace!("search {expression} matched {id}");
                return Ok(Some(id));
            }
        }

        Ok(None)
    }
}
