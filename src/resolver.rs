//! Format negotiation with tiered fallback and identity substitution.
//!
//! Given a requested format, the resolver walks the tier table of the
//! requested family from that format downwards and picks the first format
//! the track is actually available in. Availability comes from the filesize
//! metadata when it is known, and from a byte-range probe otherwise.
//!
//! When no format of the family is available, the track's identity is
//! substituted, first by its fallback recording and then by a metadata
//! search match, and negotiation starts over. When everything fails, a
//! spatial request fails outright, a request without fallback fails with
//! the most specific reason, and any other request degrades to `MP3_MISC`.
//!
//! Decisions are cached on the track, so that a second negotiation does not
//! probe again.

use std::collections::HashSet;

use url::Url;

use crate::{
    catalog::{Catalog, SearchQuery},
    error::{DownloadError, Result},
    events::{Event, ItemState, Listener, Remedy},
    http::{Probe, Transport},
    protocol::media::{Family, Format},
    stream_url,
    track::{FileSize, Track, TrackId},
};

/// What the account may stream.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct License {
    /// May stream `MP3_320`.
    pub hq: bool,
    /// May stream FLAC and spatial formats.
    pub lossless: bool,
    /// Country the account streams from, as an ISO code.
    pub country: Option<String>,
}

impl Default for License {
    fn default() -> Self {
        Self {
            hq: true,
            lossless: true,
            country: None,
        }
    }
}

impl License {
    #[must_use]
    pub fn allows(&self, format: Format) -> bool {
        match format {
            Format::FLAC | Format::MP4_RA1 | Format::MP4_RA2 | Format::MP4_RA3 => self.lossless,
            Format::MP3_320 => self.hq,
            _ => true,
        }
    }

    /// Whether a track restricted to `countries` may stream here. An empty
    /// list means the track is unrestricted.
    #[must_use]
    pub fn allows_countries(&self, countries: &[String]) -> bool {
        match &self.country {
            Some(country) if !countries.is_empty() => countries
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(country)),
            _ => true,
        }
    }
}

/// The format a track will be downloaded in, and from where.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolution {
    pub format: Format,
    pub url: Url,
}

/// Why a candidate was passed over.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Verdict {
    Accept,
    Unavailable,
    Unlicensed,
    GeoBlocked,
}

pub struct Resolver<'a, T, C> {
    transport: &'a T,
    catalog: &'a C,
    license: &'a License,
    listener: &'a dyn Listener,
    fallback_search: bool,
    max_substitutions: usize,
}

impl<'a, T, C> Resolver<'a, T, C>
where
    T: Transport,
    C: Catalog,
{
    #[must_use]
    pub fn new(
        transport: &'a T,
        catalog: &'a C,
        license: &'a License,
        listener: &'a dyn Listener,
    ) -> Self {
        Self {
            transport,
            catalog,
            license,
            listener,
            fallback_search: false,
            max_substitutions: 4,
        }
    }

    /// Also substitute tracks by a metadata search match.
    #[must_use]
    pub fn with_search(mut self, fallback_search: bool) -> Self {
        self.fallback_search = fallback_search;
        self
    }

    #[must_use]
    pub fn with_max_substitutions(mut self, max_substitutions: usize) -> Self {
        self.max_substitutions = max_substitutions;
        self
    }

    /// Probe candidates for a request, highest fidelity first.
    ///
    /// Without fallback both families are considered so that the requested
    /// format itself heads the list whatever its family.
    fn candidates(requested: Format, allow_fallback: bool) -> Vec<Format> {
        let families: &[Family] = if allow_fallback {
            &[requested.family()]
        } else {
            &[Family::Spatial, Family::Standard]
        };

        families
            .iter()
            .flat_map(|family| Format::candidates(*family))
            .filter(|format| *format <= requested)
            .take(if allow_fallback { usize::MAX } else { 1 })
            .collect()
    }

    /// Negotiates the format of `track`.
    ///
    /// On success the track carries the selected format and its url. On
    /// failure, and when degrading to `MP3_MISC`, the track keeps its
    /// original identity.
    ///
    /// # Errors
    ///
    /// * [`DownloadError::TrackNotSpatial`] when a spatial format was
    ///   requested and none is available
    /// * [`DownloadError::WrongLicense`], [`DownloadError::WrongGeolocation`]
    ///   or [`DownloadError::PreferredBitrateNotFound`] when fallback is
    ///   disabled and the requested format is unavailable
    /// * [`DownloadError::NotEncoded`] when the track has no content hash
    pub async fn resolve(
        &self,
        uuid: &str,
        track: &mut Track,
        requested: Format,
        allow_fallback: bool,
    ) -> Result<Resolution> {
        if track.is_local() {
            return Self::select(track, Format::LOCAL);
        }

        if !requested.is_probed() {
            return Self::select(track, Format::MP3_MISC);
        }

        let mut original = None;
        let candidates = Self::candidates(requested, allow_fallback);

        let mut notified = false;
        let mut restriction = None;
        let mut visited = HashSet::from([track.id]);
        let mut hops = 0;

        loop {
            for format in &candidates {
                match self.evaluate(track, *format).await? {
                    Verdict::Accept => {
                        debug!("{track}: selected {format}");
                        return Self::select(track, *format);
                    }
                    verdict => {
                        trace!("{track}: {format} is {verdict:?}");
                        if verdict != Verdict::Unavailable {
                            restriction = Some(verdict);
                        }
                        if allow_fallback && !notified {
                            self.notify(uuid, track.id);
                            notified = true;
                        }
                    }
                }
            }

            if hops >= self.max_substitutions {
                debug!("{track}: giving up after {hops} substitutions");
                break;
            }

            match self.substitute(track, &mut visited).await {
                Some((remedy, substitute)) => {
                    debug!("{track}: substituting with {} by {remedy}", substitute.id);
                    original.get_or_insert_with(|| track.identity());
                    track.adopt(&substitute);
                    hops += 1;
                }
                None => break,
            }
        }

        if let Some(original) = original {
            track.set_identity(original);
        }

        if requested.is_spatial() {
            return Err(DownloadError::TrackNotSpatial.into());
        }

        if !allow_fallback {
            let err = match restriction {
                Some(Verdict::Unlicensed) => DownloadError::WrongLicense(requested),
                Some(Verdict::GeoBlocked) => DownloadError::WrongGeolocation(
                    self.license.country.clone().unwrap_or_default(),
                ),
                _ => DownloadError::PreferredBitrateNotFound(requested),
            };
            return Err(err.into());
        }

        if !notified {
            self.notify(uuid, track.id);
        }

        debug!("{track}: degrading to {}", Format::MP3_MISC);
        Self::select(track, Format::MP3_MISC)
    }

    fn select(track: &mut Track, format: Format) -> Result<Resolution> {
        let url = match track.urls.get(&format) {
            Some(url) => url.clone(),
            None => stream_url::url_for(track, format)?,
        };

        track.format = Some(format);
        track.urls.insert(format, url.clone());
        Ok(Resolution { format, url })
    }

    fn notify(&self, uuid: &str, track: TrackId) {
        self.listener.send(Event::State {
            uuid: uuid.to_owned(),
            track,
            state: ItemState::BitrateFallback,
        });
    }

    async fn evaluate(&self, track: &mut Track, format: Format) -> Result<Verdict> {
        if !self.license.allows(format) {
            return Ok(Verdict::Unlicensed);
        }

        if !self.license.allows_countries(&track.countries) {
            return Ok(Verdict::GeoBlocked);
        }

        let cached = track.filesize(format);
        if cached.size > 0 {
            return Ok(Verdict::Accept);
        }
        if cached.tested {
            return Ok(Verdict::Unavailable);
        }

        let url = stream_url::url_for(track, format)?;
        let (filesize, verdict) = match self.transport.probe(&url).await {
            Ok(Probe::Available(size)) => {
                track.urls.insert(format, url);
                (size, Verdict::Accept)
            }
            Ok(Probe::Forbidden | Probe::Missing) => (0, Verdict::Unavailable),
            Ok(Probe::GeoBlocked) => (0, Verdict::GeoBlocked),
            Err(e) => {
                // not cached: the next negotiation may probe again
                debug!("{track}: probing {format} failed: {e}");
                return Ok(Verdict::Unavailable);
            }
        };

        track.filesizes.insert(
            format,
            FileSize {
                size: filesize,
                tested: true,
            },
        );
        Ok(verdict)
    }

    /// Finds a substitute recording that was not tried before: the
    /// fallback recording first, then a search match if enabled.
    ///
    /// Ids that were tried are added to `visited`.
    pub async fn substitute(
        &self,
        track: &Track,
        visited: &mut HashSet<TrackId>,
    ) -> Option<(Remedy, Track)> {
        if let Some(fallback_id) = track.fallback_id.filter(|id| id.is_valid()) {
            if visited.insert(fallback_id) {
                if let Some(substitute) = self.lookup(fallback_id).await {
                    return Some((Remedy::Fallback, substitute));
                }
            }
        }

        if !self.fallback_search {
            return None;
        }

        let mut query = SearchQuery::from(track);
        query.exclude = visited.iter().copied().collect();
        query.exclude.sort_unstable();
        if query.is_empty() {
            return None;
        }

        match self.catalog.search(&query).await {
            Ok(Some(id)) if visited.insert(id) => self
                .lookup(id)
                .await
                .map(|substitute| (Remedy::Search, substitute)),
            Ok(_) => None,
            Err(e) => {
                debug!("{track}: search failed: {e}");
                None
            }
        }
    }

    async fn lookup(&self, id: TrackId) -> Option<Track> {
        match self.catalog.track(id).await {
            Ok(substitute) if substitute.is_encoded() => Some(substitute),
            Ok(_) => {
                debug!("substitute {id} is not encoded");
                None
            }
            Err(e) => {
                debug!("substitute {id} lookup failed: {e}");
                None
            }
        }
    }
}
