//! Retry executor over a pool of upstream hosts.
//!
//! One call runs two nested loops:
//!
//! ```text
//! for pick in 0..retry_max_server_pick          (no wait between picks)
//!     select first unvisited host whose breaker admits us
//!     for attempt in 0..=retry_max_retry_per_server
//!         attempt > 0: wait retry_backoff(...), abortable by the token
//!         run the attempt under the cancellation envelope
//!         success -> record, return
//!         failure -> record, stop early if the breaker opened
//!     mark host visited
//! ```
//!
//! Cancellation and configuration errors end the call at once and leave
//! every host's health untouched.

use crate::backoff::Backoff;
use crate::circuit_breaker::BreakerSettings;
use crate::config::UpstreamConfig;
use crate::error::{Result, UpstreamError};
use crate::resource::{Registry, Resource};
use crate::runner::run_cancellable;
use crate::selector::{Visited, select_next};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry bounds and wait law for one call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of hosts picked.
    pub max_server_pick: u32,
    /// Retries on the same host after its first attempt.
    pub max_retry_per_server: u32,
    /// Lower bound of the wait between retries.
    pub base_interval: Duration,
    /// Upper bound of the wait between retries.
    pub max_interval: Duration,
    /// Wait generator.
    pub backoff: Backoff,
}

impl From<&UpstreamConfig> for RetryPolicy {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            max_server_pick: config.retry_max_server_pick,
            max_retry_per_server: config.retry_max_retry_per_server,
            base_interval: config.retry_base_interval,
            max_interval: config.retry_max_interval,
            backoff: config.retry_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

impl RetryPolicy {
    /// Same policy limited to one attempt on one host.
    pub fn single_attempt(self) -> Self {
        Self {
            max_server_pick: self.max_server_pick.min(1),
            max_retry_per_server: 0,
            ..self
        }
    }

    /// Upper bound on attempts made by one call.
    pub fn max_attempts(&self) -> u64 {
        u64::from(self.max_server_pick) * (1 + u64::from(self.max_retry_per_server))
    }

    /// Wait before retry number `retry` (0-based) given the previous wait.
    pub fn delay(&self, retry: u32, previous: Duration) -> Duration {
        self.backoff.delay(retry, self.base_interval, self.max_interval, previous)
    }
}

/// Half-open probe held by the current call.
///
/// Dropped while armed, the probe is handed back to the breaker, so a call
/// abandoned mid-attempt can't leave its host half-open.
struct ProbeGuard<'a> {
    resource: &'a Resource,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(resource: &'a Resource, armed: bool) -> Self {
        Self { resource, armed }
    }

    /// The probe resolved with a recorded outcome.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.resource.release_probe();
        }
    }
}

/// Load balancer dispatching work over upstream hosts.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    registry: Registry,
    policy: RetryPolicy,
}

impl LoadBalancer {
    /// Create a load balancer. Host strings are taken as given.
    pub fn new<I, S>(hosts: I, config: &UpstreamConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry: Registry::new(hosts, BreakerSettings::from(config)),
            policy: RetryPolicy::from(config),
        }
    }

    /// Create a load balancer after validating the configuration and hosts.
    pub fn try_new<I, S>(hosts: I, config: &UpstreamConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        Ok(Self {
            registry: Registry::parse(hosts, BreakerSettings::from(config))?,
            policy: RetryPolicy::from(config),
        })
    }

    /// Registered hosts.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Retry policy applied by [`LoadBalancer::submit`].
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` against upstream hosts under the configured retry policy.
    ///
    /// `work` is called once per attempt with the chosen host and must be
    /// safe to repeat.
    pub async fn submit<F, Fut, T>(&self, token: &CancellationToken, work: F) -> Result<T>
    where
        F: FnMut(Arc<Resource>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(token, self.policy, work).await
    }

    /// Run `work` under an explicit retry policy.
    pub async fn submit_with<F, Fut, T>(
        &self,
        token: &CancellationToken,
        policy: RetryPolicy,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut(Arc<Resource>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut visited = Visited::new(self.registry.len());
        let mut last_error: Option<UpstreamError> = None;
        let mut attempts: u64 = 0;

        for pick in 0..policy.max_server_pick {
            if token.is_cancelled() {
                return Err(UpstreamError::Cancelled);
            }

            let Some(selection) = select_next(&self.registry, &visited) else {
                debug!(pick, "No eligible upstream host left");
                break;
            };
            let resource = selection.resource;
            let mut probe = ProbeGuard::new(&resource, selection.admission.is_probe());
            let mut previous_delay = policy.base_interval;

            for attempt in 0..=policy.max_retry_per_server {
                if attempt > 0 {
                    let delay = policy.delay(attempt - 1, previous_delay);
                    previous_delay = delay;
                    debug!(
                        resource = %resource.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before retry"
                    );
                    tokio::select! {
                        biased;

                        _ = token.cancelled() => return Err(UpstreamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                attempts += 1;
                debug!(resource = %resource.id(), pick, attempt, "Sending attempt");

                match run_cancellable(token, work(resource.clone())).await {
                    Ok(value) => {
                        resource.record_success();
                        probe.disarm();
                        return Ok(value);
                    }
                    Err(error) if error.is_attempt_failure() => {
                        resource.record_failure();
                        probe.disarm();
                        debug!(
                            resource = %resource.id(),
                            attempt,
                            error = %error,
                            "Attempt failed"
                        );
                        last_error = Some(error);
                        if resource.is_open() {
                            break;
                        }
                    }
                    // Probe, if held, goes back to the breaker on drop.
                    Err(error) => return Err(error),
                }
            }

            visited.insert(&resource);
        }

        match last_error {
            Some(error) => {
                warn!(attempts, error = %error, "All upstream attempts failed");
                Err(error)
            }
            None => Err(UpstreamError::Unavailable { last: None }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn config(picks: u32, retries: u32) -> UpstreamConfig {
        UpstreamConfig::builder()
            .with_retry(picks, retries, Duration::from_millis(10), Duration::from_millis(50))
            .build()
    }

    fn fail(status: u16) -> UpstreamError {
        UpstreamError::Response {
            status,
            message: "upstream failure".into(),
        }
    }

    /// Records every host an attempt was sent to.
    #[derive(Clone, Default)]
    struct Trace(Arc<Mutex<Vec<String>>>);

    impl Trace {
        fn push(&self, id: &str) {
            self.0.lock().push(id.to_string());
        }

        fn hosts(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_fails_over_to_next_host() {
        let lb = LoadBalancer::new(["http://h1", "http://h2"], &config(3, 0));
        let token = CancellationToken::new();
        let trace = Trace::default();

        let t = trace.clone();
        let result = lb
            .submit(&token, move |resource| {
                t.push(resource.id());
                let ok = resource.id() == "http://h2";
                async move { if ok { Ok("done") } else { Err(fail(503)) } }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(trace.hosts(), ["http://h1", "http://h2"]);
        assert_eq!(lb.registry().resources()[0].failure_count(), 1);
        assert_eq!(lb.registry().resources()[1].failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bounds_and_last_error() {
        let lb = LoadBalancer::new(["http://h1", "http://h2", "http://h3"], &config(2, 1));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let err = lb
            .submit(&token, move |_| {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(fail(500 + n as u16)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(lb.policy().max_attempts(), 4);
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(lb.registry().resources()[0].failure_count(), 2);
        assert_eq!(lb.registry().resources()[1].failure_count(), 2);
        assert_eq!(lb.registry().resources()[2].failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_waits_follow_backoff_bounds() {
        let lb = LoadBalancer::new(["http://h1"], &config(1, 2));
        let token = CancellationToken::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let s = stamps.clone();
        let result = lb
            .submit(&token, move |_| {
                let mut stamps = s.lock();
                stamps.push(Instant::now());
                let succeed = stamps.len() == 3;
                async move { if succeed { Ok(()) } else { Err(fail(500)) } }
            })
            .await;

        assert!(result.is_ok());
        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 3);
        // First wait is seeded with the base interval: uniform(10ms, 30ms).
        assert!(stamps[1] - stamps[0] <= Duration::from_millis(30));
        for pair in stamps.windows(2) {
            let waited = pair[1] - pair[0];
            assert!(waited >= Duration::from_millis(10), "waited {:?}", waited);
            assert!(waited <= Duration::from_millis(50), "waited {:?}", waited);
        }
        assert_eq!(lb.registry().resources()[0].failure_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_server_pick_touches_nothing() {
        let lb = LoadBalancer::new(["http://h1", "http://h2"], &config(0, 3));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let err = lb
            .submit(&token, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(err.is_unavailable());
        assert!(err.last_error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_leaves_health_untouched() {
        let lb = LoadBalancer::new(["http://h1"], &config(3, 2));
        let token = CancellationToken::new();
        token.cancel();

        let err = lb
            .submit(&token, |_| async { Err::<(), _>(fail(500)) })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        let snap = lb.registry().resources()[0].snapshot();
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_records_nothing_more() {
        let config = UpstreamConfig::builder()
            .with_retry(1, 3, Duration::from_secs(10), Duration::from_secs(30))
            .build();
        let lb = LoadBalancer::new(["http://h1"], &config);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = lb
            .submit(&token, |_| async { Err::<(), _>(fail(500)) })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(lb.registry().resources()[0].failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_stops_inner_loop() {
        let config = UpstreamConfig::builder()
            .with_breaker(2, Duration::from_secs(60), Duration::from_secs(60))
            .with_retry(2, 5, Duration::from_millis(1), Duration::from_millis(1))
            .build();
        let lb = LoadBalancer::new(["http://h1", "http://h2"], &config);
        let token = CancellationToken::new();
        let trace = Trace::default();

        let t = trace.clone();
        let result = lb
            .submit(&token, move |resource| {
                t.push(resource.id());
                let ok = resource.id() == "http://h2";
                async move { if ok { Ok(()) } else { Err(fail(500)) } }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(trace.hosts(), ["http://h1", "http://h1", "http://h2"]);
        assert_eq!(lb.registry().resources()[0].state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_config_error_is_not_recorded() {
        let lb = LoadBalancer::new(["http://h1", "http://h2"], &config(3, 1));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let err = lb
            .submit(&token, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(UpstreamError::InvalidUrl("bad path".into())) }
            })
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lb.registry().resources()[0].failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_lifecycle_single_host() {
        let config = UpstreamConfig::builder()
            .with_breaker(3, Duration::from_millis(20), Duration::from_millis(100))
            .build();
        let lb = LoadBalancer::new(["http://h1"], &config);
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let (lb_ref, token_ref, counter) = (&lb, &token, calls.clone());
        let call = move || {
            let c = counter.clone();
            lb_ref.submit(token_ref, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(fail(500)) }
            })
        };

        for _ in 0..3 {
            assert_eq!(call().await.unwrap_err().status_code(), Some(500));
        }
        let resource = &lb.registry().resources()[0];
        assert_eq!(resource.state(), CircuitState::Open);
        assert_eq!(resource.snapshot().open_duration, Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_millis(10)).await;
        let err = call().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_millis(15)).await;
        assert_eq!(call().await.unwrap_err().status_code(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(resource.state(), CircuitState::Open);
        assert_eq!(resource.snapshot().open_duration, Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_is_handed_back() {
        let config = UpstreamConfig::builder()
            .with_breaker(1, Duration::from_millis(20), Duration::from_millis(100))
            .build();
        let lb = LoadBalancer::new(["http://h1"], &config);
        let resource = lb.registry().resources()[0].clone();
        resource.record_failure();
        tokio::time::advance(Duration::from_millis(25)).await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let err = lb
            .submit(&token, |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(resource.state(), CircuitState::Open);

        let fresh = CancellationToken::new();
        assert!(lb.submit(&fresh, |_| async { Ok(()) }).await.is_ok());
        assert_eq!(resource.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_call_hands_probe_back() {
        let config = UpstreamConfig::builder()
            .with_breaker(1, Duration::from_millis(20), Duration::from_millis(100))
            .build();
        let lb = LoadBalancer::new(["http://h1"], &config);
        let resource = lb.registry().resources()[0].clone();
        resource.record_failure();
        tokio::time::advance(Duration::from_millis(25)).await;

        let token = CancellationToken::new();
        let call = lb.submit(&token, |_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(5), call).await.is_err());
        assert_eq!(resource.state(), CircuitState::Open);

        assert!(lb.submit(&token, |_| async { Ok(()) }).await.is_ok());
        assert_eq!(resource.state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_attempt_policy() {
        let policy = RetryPolicy::from(&config(3, 4)).single_attempt();
        assert_eq!(policy.max_server_pick, 1);
        assert_eq!(policy.max_retry_per_server, 0);
        assert_eq!(policy.max_attempts(), 1);

        let none = RetryPolicy::from(&config(0, 4)).single_attempt();
        assert_eq!(none.max_attempts(), 0);
    }
}
