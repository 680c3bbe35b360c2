//! Upstream client configuration.

use crate::backoff::Backoff;
use crate::error::{Result, UpstreamError};
use std::time::Duration;

/// Default successive failures that trip a host's breaker.
pub const DEFAULT_SUCCESSIVE_FAIL_THRESHOLD: u32 = 5;
/// Default first open interval of a tripped breaker.
pub const DEFAULT_TRIPPED_BASE_TIME: Duration = Duration::from_millis(20);
/// Default upper bound on a breaker's open interval.
pub const DEFAULT_TRIPPED_TIME_MAX: Duration = Duration::from_millis(100);
/// Default number of distinct hosts tried per call.
pub const DEFAULT_RETRY_MAX_SERVER_PICK: u32 = 3;
/// Default retries on the same host after its first attempt.
pub const DEFAULT_RETRY_MAX_RETRY_PER_SERVER: u32 = 0;
/// Default lower bound of the wait between retries on one host.
pub const DEFAULT_RETRY_BASE_INTERVAL: Duration = Duration::from_millis(10);
/// Default upper bound of the wait between retries on one host.
pub const DEFAULT_RETRY_MAX_INTERVAL: Duration = Duration::from_millis(50);

/// Upstream client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Consecutive failures that open a host's breaker.
    pub successive_fail_threshold: u32,
    /// First open interval after a breaker trips.
    pub tripped_base_time: Duration,
    /// Maximum open interval.
    pub tripped_time_max: Duration,
    /// Generator for successive open intervals.
    pub tripped_backoff: Backoff,
    /// Maximum number of hosts picked per call.
    pub retry_max_server_pick: u32,
    /// Retries on the same host after the first attempt.
    pub retry_max_retry_per_server: u32,
    /// Lower bound of the wait between retries.
    pub retry_base_interval: Duration,
    /// Upper bound of the wait between retries.
    pub retry_max_interval: Duration,
    /// Generator for waits between retries.
    pub retry_backoff: Backoff,
    /// End-to-end request timeout of the transport.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Connection pool idle timeout.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// User agent string.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            successive_fail_threshold: DEFAULT_SUCCESSIVE_FAIL_THRESHOLD,
            tripped_base_time: DEFAULT_TRIPPED_BASE_TIME,
            tripped_time_max: DEFAULT_TRIPPED_TIME_MAX,
            tripped_backoff: Backoff::Exponential,
            retry_max_server_pick: DEFAULT_RETRY_MAX_SERVER_PICK,
            retry_max_retry_per_server: DEFAULT_RETRY_MAX_RETRY_PER_SERVER,
            retry_base_interval: DEFAULT_RETRY_BASE_INTERVAL,
            retry_max_interval: DEFAULT_RETRY_MAX_INTERVAL,
            retry_backoff: Backoff::DecorrelatedJitter,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            user_agent: format!("armature-upstream/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl UpstreamConfig {
    /// Create a new configuration builder.
    pub fn builder() -> UpstreamConfigBuilder {
        UpstreamConfigBuilder::default()
    }

    /// Check the configuration for values the breaker and retry loops can't honor.
    pub fn validate(&self) -> Result<()> {
        if self.successive_fail_threshold == 0 {
            return Err(UpstreamError::InvalidConfig(
                "successive_fail_threshold must be at least 1".to_string(),
            ));
        }
        if self.tripped_base_time > self.tripped_time_max {
            return Err(UpstreamError::InvalidConfig(format!(
                "tripped_base_time {:?} exceeds tripped_time_max {:?}",
                self.tripped_base_time, self.tripped_time_max
            )));
        }
        if self.retry_base_interval > self.retry_max_interval {
            return Err(UpstreamError::InvalidConfig(format!(
                "retry_base_interval {:?} exceeds retry_max_interval {:?}",
                self.retry_base_interval, self.retry_max_interval
            )));
        }
        Ok(())
    }
}

/// Builder for upstream client configuration.
#[derive(Debug, Default)]
pub struct UpstreamConfigBuilder {
    config: UpstreamConfig,
}

impl UpstreamConfigBuilder {
    /// Set the breaker parameters in one go.
    pub fn with_breaker(
        mut self,
        successive_fail_threshold: u32,
        tripped_base_time: Duration,
        tripped_time_max: Duration,
    ) -> Self {
        self.config.successive_fail_threshold = successive_fail_threshold;
        self.config.tripped_base_time = tripped_base_time;
        self.config.tripped_time_max = tripped_time_max;
        self
    }

    /// Set the retry parameters in one go.
    pub fn with_retry(
        mut self,
        max_server_pick: u32,
        max_retry_per_server: u32,
        base_interval: Duration,
        max_interval: Duration,
    ) -> Self {
        self.config.retry_max_server_pick = max_server_pick;
        self.config.retry_max_retry_per_server = max_retry_per_server;
        self.config.retry_base_interval = base_interval;
        self.config.retry_max_interval = max_interval;
        self
    }

    /// Set the failure threshold.
    pub fn successive_fail_threshold(mut self, threshold: u32) -> Self {
        self.config.successive_fail_threshold = threshold;
        self
    }

    /// Set the first open interval.
    pub fn tripped_base_time(mut self, time: Duration) -> Self {
        self.config.tripped_base_time = time;
        self
    }

    /// Set the maximum open interval.
    pub fn tripped_time_max(mut self, time: Duration) -> Self {
        self.config.tripped_time_max = time;
        self
    }

    /// Set the open interval generator.
    pub fn tripped_backoff(mut self, backoff: Backoff) -> Self {
        self.config.tripped_backoff = backoff;
        self
    }

    /// Set the maximum number of hosts picked per call.
    pub fn retry_max_server_pick(mut self, picks: u32) -> Self {
        self.config.retry_max_server_pick = picks;
        self
    }

    /// Set the number of retries on one host.
    pub fn retry_max_retry_per_server(mut self, retries: u32) -> Self {
        self.config.retry_max_retry_per_server = retries;
        self
    }

    /// Set the lower bound of the retry wait.
    pub fn retry_base_interval(mut self, interval: Duration) -> Self {
        self.config.retry_base_interval = interval;
        self
    }

    /// Set the upper bound of the retry wait.
    pub fn retry_max_interval(mut self, interval: Duration) -> Self {
        self.config.retry_max_interval = interval;
        self
    }

    /// Set the retry wait generator.
    pub fn retry_backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set the end-to-end request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> UpstreamConfig {
        self.config
    }
}
