//! Events emitted while downloading.
//!
//! The download engine reports what it does through a [`Listener`], a pure
//! sink that never influences the download. Events fall into three
//! categories:
//!
//! Batch Events:
//! * [`Started`](Event::Started) - A download object starts
//! * [`Finished`](Event::Finished) - A download object ran to completion
//! * [`Cancelled`](Event::Cancelled) - A download object was cancelled
//! * [`Progress`](Event::Progress) - Aggregate progress moved
//!
//! Item Events:
//! * [`State`](Event::State) - An item reached a pipeline milestone
//! * [`Warning`](Event::Warning) - An item failed but will be retried
//! * [`Failed`](Event::Failed) - An item failed for good
//!
//! # Example
//!
//! ```rust
//! use dzdl::events::{Event, Listener};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! tx.send(Event::Started { uuid: "track_1_3".into() })?;
//! ```

use std::{fmt, path::PathBuf};

use tokio::sync::mpsc;

use crate::track::{Track, TrackId};

/// Milestones of the per-item pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemState {
    GettingTags,
    GotTags,
    GettingBitrate,
    /// The requested format is unavailable and a lower one is used.
    BitrateFallback,
    GotBitrate,
    GettingAlbumArt,
    GotAlbumArt,
    Downloading,
    Downloaded,
    /// The target file exists and overwriting is disabled.
    AlreadyDownloaded,
    Tagging,
    Tagged,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self {
            Self::GettingTags => "getTags",
            Self::GotTags => "gotTags",
            Self::GettingBitrate => "getBitrate",
            Self::BitrateFallback => "bitrateFallback",
            Self::GotBitrate => "gotBitrate",
            Self::GettingAlbumArt => "getAlbumArt",
            Self::GotAlbumArt => "gotAlbumArt",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::AlreadyDownloaded => "alreadyDownloaded",
            Self::Tagging => "tagging",
            Self::Tagged => "tagged",
        };
        f.write_str(state)
    }
}

/// What the engine does next after a recoverable failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Remedy {
    /// Retry with the track's fallback recording.
    Fallback,
    /// Retry with a metadata search match.
    Search,
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Fallback => f.write_str("fallback"),
            Self::Search => f.write_str("search"),
        }
    }
}

/// Display data of the track an event is about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrackInfo {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
}

impl From<&Track> for TrackInfo {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            title: track.title.clone(),
            artist: track.artist.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Started {
        uuid: String,
    },

    Finished {
        uuid: String,
    },

    Cancelled {
        uuid: String,
    },

    /// Progress of the download object in whole percents.
    Progress {
        uuid: String,
        progress: u32,
    },

    State {
        uuid: String,
        track: TrackId,
        state: ItemState,
    },

    Warning {
        uuid: String,
        track: TrackInfo,
        reason: &'static str,
        remedy: Remedy,
    },

    Failed {
        uuid: String,
        track: TrackInfo,
        reason: &'static str,
        message: String,
    },

    /// A file was written to disk.
    Saved {
        uuid: String,
        track: TrackId,
        path: PathBuf,
    },
}

/// Sink for download events.
///
/// Implementations must not block: events are sent from within the
/// download tasks.
pub trait Listener: Send + Sync {
    fn send(&self, event: Event);
}

/// Discards all events.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopListener;

impl Listener for NoopListener {
    fn send(&self, _event: Event) {}
}

/// Forwards events to a channel. Events sent after the receiver is gone
/// are dropped.
impl Listener for mpsc::UnboundedSender<Event> {
    fn send(&self, event: Event) {
        if mpsc::UnboundedSender::send(self, event).is_err() {
            trace!("event receiver closed");
        }
    }
}
