//! Per-host circuit breaker.
//!
//! ## States
//!
//! - **Closed**: the host is eligible; consecutive failures are counted.
//! - **Open**: the host is skipped until its open interval has elapsed.
//! - **Half-Open**: exactly one probe is in flight; every other caller sees
//!   the host as ineligible until the probe resolves.
//!
//! ## Transitions
//!
//! ```text
//! Closed   --failure, count >= threshold-->  Open (interval = base)
//! Open     --admission, interval elapsed-->  HalfOpen (probe admitted)
//! HalfOpen --success-->                      Closed (count = 0, interval = base)
//! HalfOpen --failure-->                      Open (interval = backoff(trips, prev))
//! HalfOpen --probe abandoned-->              Open (same interval, re-admits at once)
//! ```
//!
//! All fields of the health record change together under one mutex, so a
//! state, its failure count and its open interval are never observed torn.

use crate::backoff::Backoff;
use crate::config::UpstreamConfig;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Host is eligible.
    Closed,
    /// Host is skipped until its open interval elapses.
    Open,
    /// A single probe is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Breaker parameters taken from [`UpstreamConfig`].
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Consecutive failures that trip the breaker.
    pub successive_fail_threshold: u32,
    /// First open interval.
    pub tripped_base_time: Duration,
    /// Maximum open interval.
    pub tripped_time_max: Duration,
    /// Generator for successive open intervals.
    pub tripped_backoff: Backoff,
}

impl From<&UpstreamConfig> for BreakerSettings {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            successive_fail_threshold: config.successive_fail_threshold,
            tripped_base_time: config.tripped_base_time,
            tripped_time_max: config.tripped_time_max,
            tripped_backoff: config.tripped_backoff,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

/// Outcome of an admission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, the attempt may proceed.
    Admitted,
    /// Breaker moved to half-open; the caller holds the only probe.
    Probe,
    /// Breaker open or a probe is already in flight.
    Rejected,
}

impl Admission {
    /// Check if the attempt may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    /// Check if the attempt is the half-open probe.
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Probe)
    }
}

/// Point-in-time copy of a breaker's health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub failures: u32,
    /// Start of the current open interval.
    pub open_since: Option<Instant>,
    /// Length of the current (or next) open interval.
    pub open_duration: Duration,
    /// Open intervals since the breaker last closed.
    pub trips: u32,
}

#[derive(Debug)]
struct Health {
    failures: u32,
    state: CircuitState,
    open_since: Option<Instant>,
    open_duration: Duration,
    trips: u32,
}

/// Circuit breaker guarding one host.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    health: Mutex<Health>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            health: Mutex::new(Health {
                failures: 0,
                state: CircuitState::Closed,
                open_since: None,
                open_duration: settings.tripped_base_time,
                trips: 0,
            }),
            settings,
        }
    }

    /// Name used in log records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.health.lock().state
    }

    /// Check if the breaker is open. Does not move it to half-open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Get consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.health.lock().failures
    }

    /// Copy the full health record.
    pub fn snapshot(&self) -> HealthSnapshot {
        let health = self.health.lock();
        HealthSnapshot {
            state: health.state,
            failures: health.failures,
            open_since: health.open_since,
            open_duration: health.open_duration,
            trips: health.trips,
        }
    }

    /// Ask whether an attempt may be sent to this host now.
    pub fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Ask whether an attempt may be sent to this host at `now`.
    pub fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut health = self.health.lock();
        match health.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::HalfOpen => Admission::Rejected,
            CircuitState::Open => {
                let elapsed = health
                    .open_since
                    .map(|since| now.saturating_duration_since(since))
                    .unwrap_or(Duration::MAX);
                if elapsed >= health.open_duration {
                    debug!(resource = %self.name, "Circuit breaker transitioning to half-open");
                    health.state = CircuitState::HalfOpen;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut health = self.health.lock();
        health.failures = 0;
        if health.state != CircuitState::Closed {
            info!(resource = %self.name, from = %health.state, "Circuit breaker closing");
            health.state = CircuitState::Closed;
            health.open_since = None;
            health.open_duration = self.settings.tripped_base_time;
            health.trips = 0;
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed attempt observed at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut health = self.health.lock();
        health.failures = health.failures.saturating_add(1);

        match health.state {
            CircuitState::Closed => {
                if health.failures >= self.settings.successive_fail_threshold {
                    health.state = CircuitState::Open;
                    health.open_since = Some(now);
                    health.open_duration = self.settings.tripped_base_time;
                    health.trips = 1;
                    warn!(
                        resource = %self.name,
                        failures = health.failures,
                        open_ms = health.open_duration.as_millis() as u64,
                        "Circuit breaker opening"
                    );
                }
            }
            CircuitState::HalfOpen => {
                let next = self
                    .settings
                    .tripped_backoff
                    .delay(
                        health.trips,
                        self.settings.tripped_base_time,
                        self.settings.tripped_time_max,
                        health.open_duration,
                    )
                    .max(self.settings.tripped_base_time);
                health.state = CircuitState::Open;
                health.open_since = Some(now);
                health.open_duration = next;
                health.trips = health.trips.saturating_add(1);
                warn!(
                    resource = %self.name,
                    trips = health.trips,
                    open_ms = next.as_millis() as u64,
                    "Circuit breaker probe failed, reopening"
                );
            }
            CircuitState::Open => {
                // Late result from an attempt admitted before the trip.
            }
        }
    }

    /// Hand back a probe that resolved with neither success nor failure.
    ///
    /// The breaker returns to open with its current interval, so the next
    /// admission query admits a new probe straight away.
    pub fn release_probe(&self) {
        let mut health = self.health.lock();
        if health.state == CircuitState::HalfOpen {
            debug!(resource = %self.name, "Circuit breaker probe abandoned");
            health.state = CircuitState::Open;
        }
    }
}
