//! Bounded retry with linear backoff.

use crate::error::{RemoteErrorKind, RemoteIoError, TransferError};
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// `max_retries` counts attempts after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt follows a failure on attempt number `attempt`
    /// (1-based).
    #[must_use]
    pub fn should_retry(&self, attempt: u32, kind: RemoteErrorKind) -> bool {
        kind.is_retryable() && attempt < self.max_attempts()
    }

    /// Pause before attempt `attempt + 1`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    pub fn wait(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Errors the retry loop can classify.
pub trait Classified: std::fmt::Display {
    fn kind(&self) -> RemoteErrorKind;
}

impl Classified for RemoteIoError {
    fn kind(&self) -> RemoteErrorKind {
        self.kind
    }
}

impl Classified for TransferError {
    fn kind(&self) -> RemoteErrorKind {
        self.kind
    }
}
