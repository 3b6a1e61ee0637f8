//! Bounded retry with exponential backoff.
//!
//! Transient failures (network, timeout, interrupted I/O) are retried up
//! to a fixed attempt count with doubling delays; permanent failures are
//! returned immediately.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::StorageError;
use crate::source::SourceError;

/// Classifies an error as worth retrying or not.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

impl TransientError for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

impl TransientError for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// A policy with no sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
        }
    }

    /// Runs `f`, retrying transient failures until the attempt bound is
    /// exhausted. The last error is returned as-is.
    pub fn run<T, E>(&self, op: &str, mut f: impl FnMut() -> Result<T, E>) -> Result<T, E>
    where
        E: TransientError + std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        op,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
