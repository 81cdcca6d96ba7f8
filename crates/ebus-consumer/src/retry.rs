//! Transient-error backoff for the fresh-read poll loop. Ported near
//! verbatim from `journal-client/src/read/uncommitted/retry.rs`'s `Retry`
//! trait — the same abstraction, retargeted at `fluxbus_store::Error`
//! instead of `std::io::Error`.

use std::fmt::Debug;
use std::time::Duration;

pub use exponential_backoff::Backoff;

/// Determines which errors to retry and how long to wait before doing so.
pub trait Retry: Debug + Send {
    /// Reset the internal state. Called whenever a read succeeds, so a
    /// dynamic backoff returns to its minimum value.
    fn reset(&mut self);

    /// Determines whether `error` should be retried, and for how long to
    /// wait first. `None` means abort and surface the error to the caller.
    fn next_backoff(&mut self, error: &fluxbus_store::Error) -> Option<Duration>;
}

#[derive(Debug, Clone)]
pub struct NoRetry;

impl Retry for NoRetry {
    fn reset(&mut self) {}

    fn next_backoff(&mut self, _error: &fluxbus_store::Error) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    error_count: u32,
    backoff: Backoff,
}

impl ExponentialBackoff {
    pub fn new(max_retries: impl Into<Option<u32>>) -> ExponentialBackoff {
        let backoff = Backoff::new(
            max_retries.into().unwrap_or(u32::MAX),
            Duration::from_millis(100),
            Some(Duration::from_secs(30)),
        );
        ExponentialBackoff {
            error_count: 0,
            backoff,
        }
    }
}

impl Retry for ExponentialBackoff {
    fn reset(&mut self) {
        self.error_count = 0;
    }

    fn next_backoff(&mut self, _error: &fluxbus_store::Error) -> Option<Duration> {
        self.error_count += 1;
        self.backoff.next(self.error_count)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(None)
    }
}
