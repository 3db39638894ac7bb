//! Backoff policies
//!
//! Used for two things: how long a dead node stays out of rotation, and how
//! long the executor pauses between attempts. Every policy is monotonic
//! non-decreasing in the attempt number and bounded above.

use std::fmt;
use std::time::Duration;

/// Delay policy indexed by a 1-based attempt (or failure) count
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Delay to apply after `attempt` consecutive failures.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay for every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    interval: Duration,
}

impl ConstantBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// Doubling delay starting at `initial`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// `max` is raised to `initial` if it is smaller.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        // 2^31 already saturates any sane cap
        let exponent = (attempt - 1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
