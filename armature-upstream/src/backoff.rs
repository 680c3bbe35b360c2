//! Backoff generators.
//!
//! A generator maps `(attempt, base, cap, previous)` to a delay that never
//! exceeds `cap`. Two laws are provided:
//!
//! - [`exponential`]: `min(cap, base * 2^attempt)`, deterministic. Default
//!   for circuit breaker open intervals.
//! - [`decorrelated_jitter`]: `min(cap, uniform(base, max(previous, base) * 3))`.
//!   Default for waits between retries on the same host.
//!
//! Generators are plain values ([`Backoff`]) so configuration can swap the
//! law without the executor knowing which one is in use.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Signature of a backoff generator: `(attempt, base, cap, previous) -> delay`.
pub type BackoffFn = fn(u32, Duration, Duration, Duration) -> Duration;

/// Backoff strategy.
#[derive(Clone, Copy)]
pub enum Backoff {
    /// Exponential growth from `base`, capped at `cap`.
    Exponential,
    /// Decorrelated jitter seeded by the previous delay.
    DecorrelatedJitter,
    /// Caller-provided generator.
    Custom(BackoffFn),
}

impl Backoff {
    /// Compute the next delay.
    pub fn delay(
        &self,
        attempt: u32,
        base: Duration,
        cap: Duration,
        previous: Duration,
    ) -> Duration {
        match self {
            Self::Exponential => exponential(attempt, base, cap, previous),
            Self::DecorrelatedJitter => decorrelated_jitter(attempt, base, cap, previous),
            Self::Custom(f) => f(attempt, base, cap, previous).min(cap),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "Exponential"),
            Self::DecorrelatedJitter => write!(f, "DecorrelatedJitter"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// `min(cap, base * 2^attempt)`.
pub fn exponential(attempt: u32, base: Duration, cap: Duration, _previous: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// `min(cap, uniform(base, max(previous, base) * 3))`.
pub fn decorrelated_jitter(
    _attempt: u32,
    base: Duration,
    cap: Duration,
    previous: Duration,
) -> Duration {
    let low = as_nanos(base);
    let high = as_nanos(previous.max(base)).saturating_mul(3);
    let pick = if high > low {
        rand::rng().random_range(low..=high)
    } else {
        low
    };
    Duration::from_nanos(pick).min(cap)
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
