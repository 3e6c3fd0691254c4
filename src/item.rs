//! Download objects and their bookkeeping.
//!
//! A [`DownloadObject`] is what a user asks for: a single track, or an
//! album or playlist of tracks. While it runs, [`Counters`] collect the
//! outcome of every track; they are shared between worker tasks and only
//! use atomics, except for the error list.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Mutex, OnceLock, PoisonError,
    },
};

use tokio_util::sync::CancellationToken;

use crate::{
    events::{Event, Listener, TrackInfo},
    protocol::media::Format,
    track::TrackId,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    Track,
    Album,
    Playlist,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Track => f.write_str("track"),
            Self::Album => f.write_str("album"),
            Self::Playlist => f.write_str("playlist"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Content {
    Single(TrackId),
    /// Tracks in collection order.
    Collection(Vec<TrackId>),
}

#[derive(Clone, Debug)]
pub struct DownloadObject {
    pub kind: Kind,
    pub id: String,
    pub format: Format,
    pub title: String,
    pub artist: String,
    pub content: Content,
    uuid: String,
    cancel: CancellationToken,
}

impl DownloadObject {
    #[must_use]
    pub fn single(id: TrackId, format: Format) -> Self {
        Self::new(Kind::Track, id.to_string(), format, Content::Single(id))
    }

    #[must_use]
    pub fn collection(kind: Kind, id: impl Into<String>, format: Format, tracks: Vec<TrackId>) -> Self {
        Self::new(kind, id.into(), format, Content::Collection(tracks))
    }

    fn new(kind: Kind, id: String, format: Format, content: Content) -> Self {
        let uuid = format!("{kind}_{id}_{}", format.id());
        Self {
            kind,
            id,
            format,
            title: String::new(),
            artist: String::new(),
            content,
            uuid,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>, artist: impl Into<String>) -> Self {
        self.title = title.into();
        self.artist = artist.into();
        self
    }

    /// Replaces the cancellation token, for instance by a child of a
    /// process-wide shutdown token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Number of tracks, used to weigh progress.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.content {
            Content::Single(_) => 1,
            Content::Collection(tracks) => tracks.len(),
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[TrackId] {
        match &self.content {
            Content::Single(id) => std::slice::from_ref(id),
            Content::Collection(tracks) => tracks,
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Requests cancellation. Running windows finish first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Display for DownloadObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.title.is_empty() {
            write!(f, "{} {}", self.kind, self.id)
        } else {
            write!(f, "{} {}: \"{} - {}\"", self.kind, self.id, self.artist, self.title)
        }
    }
}

/// A track that failed for good.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub track: TrackInfo,
    pub reason: &'static str,
    pub message: String,
}

/// Lifecycle of a download object.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BatchState {
    #[default]
    Pending,
    Running,
    Completed,
    Canceled,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Outcome of a download object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub state: BatchState,
    pub downloaded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub errors: Vec<ErrorRecord>,
    /// Written files in collection order; `None` for tracks without one.
    pub files: Vec<Option<PathBuf>>,
}

impl Summary {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == BatchState::Completed && self.failed == 0 && self.canceled == 0
    }
}

/// Progress at 100%, in fixed point.
const FULL: u64 = 100_000_000;

/// Shared bookkeeping of a running download object.
#[derive(Debug)]
pub struct Counters {
    uuid: String,
    size: usize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    canceled: AtomicUsize,
    progress: AtomicU64,
    reported: AtomicU32,
    errors: Mutex<Vec<ErrorRecord>>,
    files: Box<[OnceLock<PathBuf>]>,
}

impl Counters {
    #[must_use]
    pub fn new(object: &DownloadObject) -> Self {
        let size = object.size();
        Self {
            uuid: object.uuid().to_owned(),
            size,
            downloaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            canceled: AtomicUsize::new(0),
            progress: AtomicU64::new(0),
            reported: AtomicU32::new(0),
            errors: Mutex::new(Vec::new()),
            files: (0..size).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self, record: ErrorRecord) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Stores the file of the track at `position`. Each slot is written
    /// at most once.
    pub fn set_file(&self, position: usize, path: PathBuf) {
        if let Some(slot) = self.files.get(position) {
            if slot.set(path).is_err() {
                error!("file slot {position} of {} written twice", self.uuid);
            }
        }
    }

    /// Progress in whole percents.
    #[must_use]
    pub fn percent(&self) -> u32 {
        let progress = self.progress.load(Ordering::Relaxed);
        let percent = (progress * 100 + FULL / 2) / FULL;
        u32::try_from(percent.min(100)).unwrap_or(100)
    }

    /// Returns the progress handle of one track.
    #[must_use]
    pub fn track(&self) -> TrackProgress<'_> {
        TrackProgress {
            counters: self,
            share: 0,
        }
    }

    fn advance(&self, delta: u64, listener: &dyn Listener) {
        self.progress.fetch_add(delta, Ordering::Relaxed);

        // Report every other percent, like the queue does in the UI.
        let percent = self.percent();
        if percent % 2 == 0 || percent == 100 {
            let previous = self.reported.fetch_max(percent, Ordering::Relaxed);
            if previous < percent {
                listener.send(Event::Progress {
                    uuid: self.uuid.clone(),
                    progress: percent,
                });
            }
        }
    }

    #[must_use]
    pub fn summary(&self, state: BatchState) -> Summary {
        Summary {
            state,
            downloaded: self.downloaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            errors: self
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            files: self.files.iter().map(|slot| slot.get().cloned()).collect(),
        }
    }
}

/// Progress contribution of one track. Only moves forward.
#[derive(Debug)]
pub struct TrackProgress<'a> {
    counters: &'a Counters,
    share: u64,
}

impl TrackProgress<'_> {
    /// Updates the track to `done` of `total` bytes.
    pub fn update(&mut self, done: u64, total: u64, listener: &dyn Listener) {
        if total == 0 {
            return;
        }

        let full = FULL / self.counters.size.max(1) as u64;
        let share = u64::try_from(u128::from(full) * u128::from(done.min(total)) / u128::from(total))
            .unwrap_or(full);
        if share > self.share {
            self.counters.advance(share - self.share, listener);
            self.share = share;
        }
    }

    /// Completes the share of this track, whatever its outcome.
    pub fn complete(&mut self, listener: &dyn Listener) {
        self.update(1, 1, listener);
    }
}
