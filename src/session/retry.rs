//! Configuration for media-session connection retries.

use rand::random;
use std::time::Duration;

/// Configuration to be used for retrying session connection attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Retry {
    /// Strategy used to determine how long to wait between retry attempts.
    ///
    /// *Defaults to an [`ExponentialBackoff`] from 1s to 5s with no
    /// jitter.*
    ///
    /// [`ExponentialBackoff`]: Strategy::Backoff
    pub strategy: Strategy,
    /// The maximum number of retries to attempt.
    ///
    /// `None` will attempt an infinite number of retries, while `Some(0)`
    /// will attempt to connect *once* (no retries).
    ///
    /// *Defaults to `Some(2)`, i.e., three attempts in total.*
    pub retry_limit: Option<usize>,
}

impl Retry {
    /// Delay before the next attempt, or `None` once the retry budget is
    /// spent.
    pub(crate) fn retry_in(
        &self,
        last_wait: Option<Duration>,
        attempts: usize,
    ) -> Option<Duration> {
        match self.retry_limit {
            Some(limit) if attempts >= limit => None,
            _ => Some(self.strategy.retry_in(last_wait)),
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            strategy: Strategy::Backoff(Default::default()),
            retry_limit: Some(2),
        }
    }
}

/// Logic used to determine how long to wait between retry attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// The coordinator will wait for the same amount of time between each
    /// retry.
    Every(Duration),
    /// Exponential backoff waiting strategy, where the duration between
    /// attempts (approximately) doubles each time.
    Backoff(ExponentialBackoff),
}

impl Strategy {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        match self {
            Self::Every(t) => *t,
            Self::Backoff(exp) => exp.retry_in(last_wait),
        }
    }
}

/// Exponential backoff waiting strategy.
///
/// Each attempt waits for twice the last delay plus/minus a random jitter,
/// clamped to a min and max value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Minimum amount of time to wait between retries.
    ///
    /// *Defaults to 1s.*
    pub min: Duration,
    /// Maximum amount of time to wait between retries.
    ///
    /// This will be clamped to `>=` min.
    ///
    /// *Defaults to 5s.*
    pub max: Duration,
    /// Amount of uniform random jitter to apply to generated wait times.
    /// I.e., 0.1 will add +/-10% to generated intervals.
    ///
    /// This is restricted to within +/-100%.
    ///
    /// *Defaults to `0.0`.*
    pub jitter: f32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        }
    }
}

impl ExponentialBackoff {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        let attempt = last_wait.map_or(self.min, |t| 2 * t);
        let perturb = (1.0 - (self.jitter * 2.0 * (random::<f32>() - 0.5))).clamp(0.0, 2.0);
        let target_time = attempt.mul_f32(perturb);

        // Clamp target time into the given range.
        let safe_max = if self.max < self.min {
            self.min
        } else {
            self.max
        };

        target_time.clamp(self.min, safe_max)
    }
}
