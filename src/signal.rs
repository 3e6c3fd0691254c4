//! System signal handling for cancelling downloads.
//!
//! * Unix: SIGTERM and Ctrl-C (SIGINT)
//! * Windows: Ctrl-C only
//!
//! A signal cancels the running batch cooperatively: windows that are in
//! flight finish, partial files are removed, and the batch reports how far
//! it got.

use std::{fmt, future::Future, io};

use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signal that triggered a shutdown.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[expect(clippy::module_name_repetitions)]
pub enum ShutdownSignal {
    /// Interrupt signal (Ctrl-C/SIGINT)
    Interrupt,
    /// Termination signal (SIGTERM)
    Terminate,
}

pub struct Handler {
    #[cfg(unix)]
    sigterm: Signal,
}

impl Handler {
    /// Creates a new signal handler.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                () = interrupt(tokio::signal::ctrl_c()) => ShutdownSignal::Interrupt,
                _ = self.sigterm.recv() => ShutdownSignal::Terminate,
            }
        }

        #[cfg(not(unix))]
        {
            interrupt(tokio::signal::ctrl_c()).await;
            ShutdownSignal::Interrupt
        }
    }

    /// Cancels `token` on the first signal, unless it is cancelled first.
    pub fn cancel_on_signal(mut self, token: CancellationToken) {
        tokio::spawn(async move {
            tokio::select! {
                signal = self.recv() => {
                    info!("received {signal}, cancelling downloads");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        });
    }
}

/// Resolves when Ctrl-C arrives. If the handler cannot be registered,
/// Ctrl-C is never reported.
async fn interrupt<F>(registration: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = registration.await {
        error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "Ctrl+C"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn failed_registration_never_interrupts() {
        let failed = interrupt(async { Err(io::Error::other("no signal driver")) });
        assert!(timeout(Duration::from_millis(20), failed).await.is_err());
    }

    #[tokio::test]
    async fn delivered_interrupts_resolve() {
        let delivered = interrupt(async { Ok(()) });
        assert!(timeout(Duration::from_millis(20), delivered).await.is_ok());
    }
}
