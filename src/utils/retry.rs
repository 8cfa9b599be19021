//! Bounded exponential backoff shared by polling and conflict-retry loops.

use std::time::Duration;

/// Configuration for bounded retry with exponential backoff.
///
/// Used when polling an external signer for a pending certificate request
/// and when re-reading a root certificate object after a write conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy for optimistic-concurrency writes: five attempts, short waits.
    pub fn conflict_retry() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }

    /// Policy with no waiting between attempts. Intended for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }

    /// Sum of every backoff the policy can wait through.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|attempt| self.backoff_for_attempt(attempt)).sum()
    }

    /// Sleep for the backoff that precedes `attempt`.
    pub async fn wait(&self, attempt: u32) {
        let delay = self.backoff_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
