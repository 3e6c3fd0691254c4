//! Resumable transfer of a remote asset into a file.
//!
//! A transfer fetches the asset, runs it through the [`ChunkCipher`] and
//! appends the result to the sink, window by window. Progress is reported
//! and cancellation is checked after every window.
//!
//! The transfer keeps track of how many *source* bytes it has confirmed.
//! That offset is always window-aligned, so that after a transient fault
//! the asset can be fetched again from that offset with the cipher still
//! aligned. Transient faults are retried silently with an exponential
//! backoff; when the retries are exhausted the asset counts as not
//! available.

use std::{io::SeekFrom, pin::pin};

use exponential_backoff::Backoff;
use futures_util::TryStreamExt;
use http::StatusCode;
use tokio::{
    fs::File,
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    decrypt::{self, ChunkCipher},
    error::{DownloadError, Error, Result},
    http::Transport,
};

/// How a transfer ended, other than by failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Transfer {
    /// All bytes were transferred.
    Complete { bytes: u64 },
    /// The transfer was cancelled after this many source bytes.
    Cancelled { bytes: u64 },
}

/// Progress callback, called with the confirmed and total source bytes.
pub type Progress<'a> = &'a mut (dyn FnMut(u64, u64) + Send);

pub struct TransferStream<'a, T> {
    transport: &'a T,
    backoff: Backoff,
}

/// State carried across attempts of one transfer.
struct Attempt {
    offset: u64,
    total: Option<u64>,
}

impl<'a, T> TransferStream<'a, T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &'a T, config: &Config) -> Self {
        Self {
            transport,
            backoff: Backoff::new(config.max_retries, config.retry_min, config.retry_max),
        }
    }

    /// Transfers `url` into `sink`, starting at `resume_offset` source bytes.
    ///
    /// When resuming, `sink` must already hold the output of the first
    /// `resume_offset` source bytes, and `resume_offset` must be a multiple
    /// of [`decrypt::WINDOW_SIZE`].
    ///
    /// # Errors
    ///
    /// * [`DownloadError::NotAvailable`] when the remote refuses the asset
    ///   or transient faults persist
    /// * [`DownloadError::DownloadEmpty`] when the asset is empty
    /// * decode faults of the [`ChunkCipher`]
    /// * I/O errors of the sink
    pub async fn run(
        &self,
        url: &Url,
        sink: &mut File,
        resume_offset: u64,
        cipher: ChunkCipher,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<Transfer> {
        debug_assert_eq!(resume_offset % decrypt::WINDOW_SIZE as u64, 0);

        let mut attempt = Attempt {
            offset: resume_offset,
            total: None,
        };
        let mut delays = (&self.backoff).into_iter();

        loop {
            if cancel.is_cancelled() {
                return Ok(Transfer::Cancelled {
                    bytes: attempt.offset,
                });
            }

            let e = match self
                .attempt(url, sink, &mut attempt, &cipher, cancel, progress)
                .await
            {
                Ok(transfer) => return Ok(transfer),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            let Some(Some(delay)) = delays.next() else {
                warn!("giving up on {url} at {} bytes: {e}", attempt.offset);
                return Err(DownloadError::NotAvailable(e.to_string()).into());
            };

            debug!(
                "resuming at {} bytes in {}ms after: {e}",
                attempt.offset,
                delay.as_millis()
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Ok(Transfer::Cancelled { bytes: attempt.offset });
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        sink: &mut File,
        attempt: &mut Attempt,
        cipher: &ChunkCipher,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<Transfer> {
        let response = self.transport.fetch(url, attempt.offset).await?;

        match response.status {
            StatusCode::OK if attempt.offset > 0 => {
                debug!("server ignored range request, restarting from zero");
                sink.set_len(0).await?;
                sink.seek(SeekFrom::Start(0)).await?;
                attempt.offset = 0;
            }
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            status => {
                return Err(DownloadError::NotAvailable(format!("{url} returned {status}")).into());
            }
        }

        match (attempt.total, response.content_length) {
            (None, Some(0)) => return Err(DownloadError::DownloadEmpty.into()),
            (None, Some(length)) => attempt.total = Some(attempt.offset + length),
            _ => {}
        }

        let cipher = if attempt.offset > 0 {
            cipher.clone().resumed()
        } else {
            cipher.clone()
        };

        let mut windows = pin!(decrypt::decrypt(response.body, cipher));
        while let Some(window) = windows.try_next().await? {
            // A short window must end the asset. Otherwise the body broke
            // off cleanly mid-window, and writing it would misalign the
            // cipher on resume.
            if let Some(total) = attempt.total {
                let end = attempt.offset + window.source_len as u64;
                if window.source_len < decrypt::WINDOW_SIZE && end != total {
                    sink.flush().await?;
                    return Err(Error::data_loss(format!(
                        "stream broke off at {end} of {total} bytes"
                    )));
                }
            }

            sink.write_all(&window.data).await?;
            attempt.offset += window.source_len as u64;
            progress(attempt.offset, attempt.total.unwrap_or(attempt.offset));

            if cancel.is_cancelled() {
                sink.flush().await?;
                return Ok(Transfer::Cancelled {
                    bytes: attempt.offset,
                });
            }
        }

        sink.flush().await?;

        if let Some(total) = attempt.total {
            if attempt.offset < total {
                return Err(Error::data_loss(format!(
                    "stream ended at {} of {total} bytes",
                    attempt.offset
                )));
            }
        }

        if attempt.offset == 0 {
            return Err(DownloadError::DownloadEmpty.into());
        }

        Ok(Transfer::Complete {
            bytes: attempt.offset,
        })
    }
}
