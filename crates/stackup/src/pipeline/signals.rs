//! Translates termination signals into pipeline cancellation.

use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use super::PIPELINE_TARGET;
use super::cancel::CancellationToken;
use super::error::ShutdownError;

/// Background listener that cancels a token on SIGTERM, SIGINT, SIGQUIT or
/// SIGHUP.
///
/// Dropping the watcher unregisters the listener and joins its thread.
#[derive(Debug)]
pub struct SignalWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    /// Registers the handlers and starts the listener thread.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when the handlers cannot be
    /// registered and [`ShutdownError::Thread`] when the thread cannot start.
    pub fn install(token: CancellationToken) -> Result<Self, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name(String::from("stackup-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: PIPELINE_TARGET,
                        signal,
                        "shutdown signal received"
                    );
                    token.cancel();
                }
            });
        match thread {
            Ok(thread) => Ok(Self {
                handle,
                thread: Some(thread),
            }),
            Err(source) => {
                handle.close();
                Err(ShutdownError::Thread { source })
            }
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: PIPELINE_TARGET, "signal watcher thread panicked");
        }
    }
}
