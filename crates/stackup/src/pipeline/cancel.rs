//! Cancellation shared between the signal watcher and the pipeline thread.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cloneable flag that wakes blocked waiters when cancelled.
///
/// Waits are implemented with a condition variable so a cancellation
/// delivered mid-sleep ends the sleep immediately instead of after the poll
/// interval.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    /// Builds a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled and wakes every waiter.
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        condvar.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for up to `timeout`, returning true if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
        *cancelled
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        let (flag, condvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            cancelled = condvar
                .wait(cancelled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
