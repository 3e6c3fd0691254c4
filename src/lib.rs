//! Deezer download engine.
//!
//! Resolves Deezer tracks, albums and playlists into audio files: it
//! negotiates the best available format, derives and fetches the stream,
//! decrypts it on the fly and writes the result to disk, tolerating
//! transient network faults without losing progress.
//!
//! The engine is built from these parts, leaf first:
//!
//! * [`stream_url`] - derivation of obfuscated stream urls
//! * [`decrypt`] - chunked stream decryption
//! * [`resolver`] - format negotiation with fallback and substitution
//! * [`transfer`] - resumable, cancellable transfers
//! * [`downloader`] - bounded concurrent orchestration
//!
//! Metadata comes in through a [`catalog::Catalog`], bytes through a
//! [`http::Transport`], and events go out through an [`events::Listener`].
//! [`gateway::Gateway`] and [`http::Client`] implement the first two against
//! Deezer.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod arl;
pub mod artwork;
pub mod catalog;
pub mod config;
pub mod decrypt;
pub mod downloader;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod item;
pub mod link;
pub mod paths;
pub mod protocol;
pub mod resolver;
pub mod signal;
pub mod stream_url;
pub mod tagger;
pub mod track;
pub mod transfer;
