//! Renewal jitter.
//!
//! Certificates issued together would otherwise all renew on the same tick.
//! A small random delay is added to the renewal lead time so renewals spread
//! out. The source is injectable so tests can pin it.

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

/// Jitter is drawn from whole seconds in `[0, NOISE_SECONDS)`.
pub const NOISE_SECONDS: u64 = 5;

/// Source of renewal noise.
pub trait JitterSource: Send + Sync + Debug {
    /// Noise to add to the renewal lead time. Must be below [`NOISE_SECONDS`].
    fn renewal_noise(&self) -> Duration;
}

/// Uniform whole-second jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn renewal_noise(&self) -> Duration {
        Duration::from_secs(rand::thread_rng().gen_range(0..NOISE_SECONDS))
    }
}

/// Constant jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub Duration);

impl FixedJitter {
    pub fn none() -> Self {
        Self(Duration::ZERO)
    }
}

impl JitterSource for FixedJitter {
    fn renewal_noise(&self) -> Duration {
        self.0
    }
}
