//! Backoff used by the GraphQL retry link.
//!
//! The REST client waits a fixed, per-call delay between attempts and needs
//! nothing from here beyond the retry decision on the error types.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(3000);

/// Exponential backoff with optional jitter.
///
/// The delay before retry `n` (0-based) is `min(initial * 2^n, max)`; with
/// jitter enabled it is drawn uniformly from `[that / 2, that]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: true,
        }
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound of the delay before retry `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if self.jitter {
            let floor = ceiling / 2;
            floor + (ceiling - floor).mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
        } else {
            ceiling
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}
