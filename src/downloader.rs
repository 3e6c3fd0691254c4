//! Download orchestration.
//!
//! The [`Downloader`] runs download objects. A single track runs inline;
//! the tracks of an album or playlist run on a bounded pool of tasks. Each
//! track goes through the same pipeline:
//!
//! 1. look up its metadata
//! 2. negotiate the format
//! 3. pick the target path, skipping tracks that were already downloaded
//! 4. get the album artwork
//! 5. transfer, decrypting on the fly
//! 6. tag the finished file
//!
//! A track that fails with a failure that another recording might not have
//! is retried with its fallback recording and then with a search match.
//! Only then does it count as failed. Failures are isolated: one failed
//! track never stops the others.
//!
//! Cancellation is cooperative. It is checked before each track starts and
//! after every transferred window; cancelled tracks count neither as
//! downloaded nor as failed.

use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{fs, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    artwork::{self, ArtworkCache},
    catalog::Catalog,
    config::Config,
    decrypt::ChunkCipher,
    error::{DownloadError, Error, ErrorKind, Result},
    events::{Event, ItemState, Listener, TrackInfo},
    http::Transport,
    item::{BatchState, Content, Counters, DownloadObject, ErrorRecord, Summary, TrackProgress},
    paths,
    protocol::media::Format,
    resolver::{License, Resolver},
    stream_url,
    tagger::Tagger,
    track::{Track, TrackId},
    transfer::{Transfer, TransferStream},
};

/// How a track ended, other than by failure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemOutcome {
    Downloaded(PathBuf),
    AlreadyDownloaded(PathBuf),
    Cancelled,
}

/// A track that failed, with what is known about it.
struct Failure {
    track: TrackInfo,
    error: Error,
}

/// What the tasks of one download object share.
struct Batch {
    uuid: String,
    format: Format,
    cancel: CancellationToken,
    /// Whether files are numbered by their position.
    collection: bool,
    /// Target paths, by the position of the track writing them.
    claimed: Mutex<HashMap<PathBuf, usize>>,
}

impl Batch {
    fn new(object: &DownloadObject) -> Self {
        Self {
            uuid: object.uuid().to_owned(),
            format: object.format,
            cancel: object.cancellation_token().clone(),
            collection: matches!(object.content, Content::Collection(_)),
            claimed: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves `path` for the track at `position`. Fails when another
    /// track of this batch already writes to it.
    fn claim(&self, path: &Path, position: usize) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        match claimed.entry(path.to_path_buf()) {
            Entry::Occupied(owner) => *owner.get() == position,
            Entry::Vacant(slot) => {
                slot.insert(position);
                true
            }
        }
    }
}

pub struct Downloader<T, C, G> {
    inner: Arc<Inner<T, C, G>>,
}

struct Inner<T, C, G> {
    transport: T,
    catalog: C,
    tagger: G,
    listener: Arc<dyn Listener>,
    config: Arc<Config>,
    license: License,
    artwork: ArtworkCache,
}

impl<T, C, G> Downloader<T, C, G>
where
    T: Transport + 'static,
    C: Catalog + 'static,
    G: Tagger + 'static,
{
    #[must_use]
    pub fn new(
        transport: T,
        catalog: C,
        tagger: G,
        listener: Arc<dyn Listener>,
        config: Arc<Config>,
        license: License,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                catalog,
                tagger,
                listener,
                config,
                license,
                artwork: ArtworkCache::new(),
            }),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.inner.catalog
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Downloads all tracks of `object` and waits for them to finish.
    ///
    /// Failing tracks do not make this fail: they are counted and recorded
    /// in the summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the download directory cannot be created.
    pub async fn download(&self, object: &DownloadObject) -> Result<Summary> {
        let mut state = BatchState::Pending;
        debug!("{object}: {state}");

        fs::create_dir_all(&self.inner.config.download_location).await?;

        let batch = Arc::new(Batch::new(object));
        let counters = Arc::new(Counters::new(object));

        state = BatchState::Running;
        info!("downloading {object} in {}", object.format);
        self.inner.listener.send(Event::Started {
            uuid: batch.uuid.clone(),
        });

        match &object.content {
            Content::Single(id) => {
                self.inner.item(&batch, 0, *id, &counters).await;
            }
            Content::Collection(tracks) => {
                self.collection(&batch, tracks, &counters).await;
            }
        }

        if batch.cancel.is_cancelled() {
            state = BatchState::Canceled;
            self.inner.listener.send(Event::Cancelled {
                uuid: batch.uuid.clone(),
            });
        } else {
            state = BatchState::Completed;
            self.inner.listener.send(Event::Finished {
                uuid: batch.uuid.clone(),
            });
        }

        let summary = counters.summary(state);
        info!(
            "{object}: {state} with {} downloaded, {} failed, {} canceled",
            summary.downloaded, summary.failed, summary.canceled
        );
        Ok(summary)
    }

    async fn collection(&self, batch: &Arc<Batch>, tracks: &[TrackId], counters: &Arc<Counters>) {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (position, id) in tracks.iter().copied().enumerate() {
            let inner = Arc::clone(&self.inner);
            let batch = Arc::clone(batch);
            let counters = Arc::clone(counters);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                // Held until the track is done.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    counters.canceled();
                    return;
                };
                inner.item(&batch, position, id, &counters).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("{}: download task failed: {e}", batch.uuid);
            }
        }
    }
}

impl<T, C, G> Inner<T, C, G>
where
    T: Transport,
    C: Catalog,
    G: Tagger,
{
    fn listener(&self) -> &dyn Listener {
        &*self.listener
    }

    fn state(&self, batch: &Batch, track: TrackId, state: ItemState) {
        trace!("{}: {track} {state}", batch.uuid);
        self.listener().send(Event::State {
            uuid: batch.uuid.clone(),
            track,
            state,
        });
    }

    fn resolver(&self) -> Resolver<'_, T, C> {
        Resolver::new(
            &self.transport,
            &self.catalog,
            &self.license,
            self.listener(),
        )
        .with_search(self.config.fallback_search)
        .with_max_substitutions(self.config.max_substitutions)
    }

    /// Runs one track to a terminal outcome and books it.
    async fn item(&self, batch: &Batch, position: usize, id: TrackId, counters: &Counters) {
        if batch.cancel.is_cancelled() {
            counters.canceled();
            return;
        }

        let mut progress = counters.track();
        match self.attempts(batch, position, id, &mut progress).await {
            Ok(ItemOutcome::Downloaded(path) | ItemOutcome::AlreadyDownloaded(path)) => {
                counters.downloaded();
                counters.set_file(position, path);
                progress.complete(self.listener());
            }
            Ok(ItemOutcome::Cancelled) => {
                debug!("{}: {id} cancelled", batch.uuid);
                counters.canceled();
            }
            Err(Failure { track, error }) => {
                let reason = error.reason();
                let message = error.to_string();
                error!("{}: {} - {} failed: {message}", batch.uuid, track.artist, track.title);

                self.listener().send(Event::Failed {
                    uuid: batch.uuid.clone(),
                    track: track.clone(),
                    reason,
                    message: message.clone(),
                });
                counters.failed(ErrorRecord {
                    track,
                    reason,
                    message,
                });
                progress.complete(self.listener());
            }
        }
    }

    /// Runs the pipeline, substituting the recording while failures allow.
    async fn attempts(
        &self,
        batch: &Batch,
        position: usize,
        id: TrackId,
        progress: &mut TrackProgress<'_>,
    ) -> std::result::Result<ItemOutcome, Failure> {
        let mut track = self.tags(batch, id).await.map_err(|error| Failure {
            track: TrackInfo {
                id,
                ..Default::default()
            },
            error,
        })?;
        track.position = batch.collection.then_some(position + 1);

        let resolver = self.resolver();
        let mut visited = HashSet::from([track.id]);
        let mut hops = 0;

        loop {
            let error = match self.pipeline(batch, position, &mut track, progress).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.kind == ErrorKind::Cancelled && batch.cancel.is_cancelled() => {
                    return Ok(ItemOutcome::Cancelled);
                }
                Err(e) => e,
            };

            let substitutable = error
                .download_error()
                .is_some_and(DownloadError::is_substitutable);
            if !substitutable
                || hops >= self.config.max_substitutions
                || batch.cancel.is_cancelled()
            {
                return Err(Failure {
                    track: TrackInfo::from(&track),
                    error,
                });
            }

            let Some((remedy, substitute)) = resolver.substitute(&track, &mut visited).await else {
                return Err(Failure {
                    track: TrackInfo::from(&track),
                    error,
                });
            };

            warn!(
                "{}: {track} failed ({error}), retrying with {remedy} {}",
                batch.uuid, substitute.id
            );
            self.listener().send(Event::Warning {
                uuid: batch.uuid.clone(),
                track: TrackInfo::from(&track),
                reason: error.reason(),
                remedy,
            });

            track.adopt(&substitute);
            hops += 1;
        }
    }

    async fn tags(&self, batch: &Batch, id: TrackId) -> Result<Track> {
        if !id.is_valid() {
            return Err(DownloadError::NotOnDeezer.into());
        }

        self.state(batch, id, ItemState::GettingTags);
        let track = self.catalog.track(id).await?;
        self.state(batch, id, ItemState::GotTags);

        Ok(track)
    }

    async fn pipeline(
        &self,
        batch: &Batch,
        position: usize,
        track: &mut Track,
        progress: &mut TrackProgress<'_>,
    ) -> Result<ItemOutcome> {
        if !track.id.is_valid() {
            return Err(DownloadError::NotOnDeezer.into());
        }
        if !track.is_encoded() {
            return Err(DownloadError::NotEncoded.into());
        }

        self.state(batch, track.id, ItemState::GettingBitrate);
        let resolution = self
            .resolver()
            .resolve(&batch.uuid, track, batch.format, self.config.fallback_bitrate)
            .await?;
        self.state(batch, track.id, ItemState::GotBitrate);

        let path = paths::track_path(&self.config.download_location, track, resolution.format);
        if !batch.claim(&path, position) {
            return Err(Error::already_exists(format!(
                "{} is written by another track",
                path.display()
            )));
        }
        if !self.config.overwrite && fs::try_exists(&path).await? {
            info!("{track}: already downloaded to {}", path.display());
            self.state(batch, track.id, ItemState::AlreadyDownloaded);
            return Ok(ItemOutcome::AlreadyDownloaded(path));
        }

        self.state(batch, track.id, ItemState::GettingAlbumArt);
        let artwork = match artwork::cover_url(&track.album_picture, self.config.artwork_size)? {
            Some(url) => self.artwork.get(&self.transport, &url).await?,
            None => None,
        };
        self.state(batch, track.id, ItemState::GotAlbumArt);

        self.state(batch, track.id, ItemState::Downloading);
        let cipher = ChunkCipher::new(track.id, stream_url::is_encrypted(&resolution.url));
        let transfer = self
            .transfer(batch, &resolution.url, &path, cipher, progress)
            .await;

        match transfer {
            Ok(Transfer::Complete { bytes }) => {
                debug!("{track}: transferred {bytes} bytes in {}", resolution.format);
                self.state(batch, track.id, ItemState::Downloaded);
            }
            Ok(Transfer::Cancelled { bytes }) => {
                debug!("{track}: cancelled after {bytes} bytes");
                remove(&path).await;
                return Ok(ItemOutcome::Cancelled);
            }
            Err(e) => {
                remove(&path).await;
                return Err(e);
            }
        }

        self.state(batch, track.id, ItemState::Tagging);
        self.tagger.tag(&path, track, artwork).await?;
        self.state(batch, track.id, ItemState::Tagged);

        info!("{track}: saved to {}", path.display());
        self.listener().send(Event::Saved {
            uuid: batch.uuid.clone(),
            track: track.id,
            path: path.clone(),
        });

        Ok(ItemOutcome::Downloaded(path))
    }

    /// Transfers into a fresh file that is closed before returning.
    async fn transfer(
        &self,
        batch: &Batch,
        url: &url::Url,
        path: &Path,
        cipher: ChunkCipher,
        progress: &mut TrackProgress<'_>,
    ) -> Result<Transfer> {
        let mut sink = fs::File::create(path).await?;
        let listener = self.listener();
        let mut report = |done, total| progress.update(done, total, listener);

        let transfer = TransferStream::new(&self.transport, &self.config)
            .run(url, &mut sink, 0, cipher, &batch.cancel, &mut report)
            .await?;

        sink.sync_all().await?;
        Ok(transfer)
    }
}

/// Removes a partial file. A file that is already gone is fine.
async fn remove(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => trace!("removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {e}", path.display()),
    }
}
