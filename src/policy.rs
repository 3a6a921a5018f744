//! Reconnect policy: attempt limit and capped exponential backoff.

use std::time::Duration;

use snafu::prelude::*;

/// Error when construct a reconnect policy
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum PolicyError {
    /// max attempts is zero
    #[snafu(display("max reconnect attempts must be greater than zero"))]
    ZeroAttempts,

    /// base delay is zero
    #[snafu(display("base reconnect delay must be greater than zero"))]
    ZeroBaseDelay,

    /// max delay is smaller than base delay
    #[snafu(display("max reconnect delay {max:?} is smaller than base delay {base:?}"))]
    MaxBelowBase {
        /// base delay
        base: Duration,
        /// max delay
        max: Duration,
    },
}

/// Immutable reconnect configuration.
///
/// The delay before reconnect attempt `n` is `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
        }
    }
}

impl ReconnectPolicy {
    /// Create a validated policy
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, PolicyError> {
        ensure!(max_attempts > 0, error::ZeroAttempts);
        ensure!(!base_delay.is_zero(), error::ZeroBaseDelay);
        ensure!(
            max_delay >= base_delay,
            error::MaxBelowBase {
                base: base_delay,
                max: max_delay
            }
        );

        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
        })
    }

    /// attempts after which no reconnect is scheduled
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// delay cap
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Backoff delay for given attempt counter value.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// true if the counter reached the limit and nothing more should be scheduled
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
