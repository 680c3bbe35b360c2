//! # Armature Upstream
//!
//! A client-side HTTP dispatcher for a fixed pool of upstream hosts, with a
//! circuit breaker per host and bounded retry across hosts.
//!
//! ## Features
//!
//! - **Per-host Circuit Breakers**: Hosts that keep failing are skipped for a
//!   growing interval, then admitted again through a single probe
//! - **Bounded Retry**: A call tries a limited number of distinct hosts and
//!   retries each a limited number of times
//! - **Backoff**: Exponential and decorrelated-jitter generators, or your own
//! - **Cancellation**: Every call is bound to a `CancellationToken`; cancelled
//!   attempts never count against a host
//! - **Connection Pooling**: One shared reqwest transport
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_upstream::{UpstreamClient, UpstreamConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = UpstreamClient::new(
//!         ["http://10.0.0.1:8080", "http://10.0.0.2:8080"],
//!         UpstreamConfig::default(),
//!     )?;
//!
//!     let token = CancellationToken::new();
//!     let body = client
//!         .get("/v1/users")
//!         .send(&token, |response| response.error_for_status()?.text())
//!         .await?;
//!
//!     println!("{}", body);
//!     Ok(())
//! }
//! ```
//!
//! ## Tuning Retry and Breakers
//!
//! ```rust,no_run
//! use armature_upstream::{Backoff, UpstreamClient, UpstreamConfig};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UpstreamConfig::builder()
//!         .with_breaker(3, Duration::from_millis(50), Duration::from_secs(5))
//!         .with_retry(2, 1, Duration::from_millis(10), Duration::from_millis(200))
//!         .retry_backoff(Backoff::Exponential)
//!         .build();
//!
//!     let client = UpstreamClient::new(["http://10.0.0.1:8080"], config)?;
//!     let token = CancellationToken::new();
//!
//!     // Not idempotent: send once, to one host.
//!     let status = client
//!         .post("/v1/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .no_retry()
//!         .send(&token, |response| Ok(response.status()))
//!         .await?;
//!
//!     println!("Status: {}", status);
//!     Ok(())
//! }
//! ```

mod backoff;
mod balancer;
mod circuit_breaker;
mod client;
mod config;
mod error;
mod request;
mod resource;
mod response;
mod runner;
mod selector;
mod urls;

pub use backoff::{Backoff, BackoffFn, decorrelated_jitter, exponential};
pub use balancer::{LoadBalancer, RetryPolicy};
pub use circuit_breaker::{Admission, BreakerSettings, CircuitBreaker, CircuitState, HealthSnapshot};
pub use client::UpstreamClient;
pub use config::{
    DEFAULT_RETRY_BASE_INTERVAL, DEFAULT_RETRY_MAX_INTERVAL, DEFAULT_RETRY_MAX_RETRY_PER_SERVER,
    DEFAULT_RETRY_MAX_SERVER_PICK, DEFAULT_SUCCESSIVE_FAIL_THRESHOLD, DEFAULT_TRIPPED_BASE_TIME,
    DEFAULT_TRIPPED_TIME_MAX, UpstreamConfig, UpstreamConfigBuilder,
};
pub use error::{BoxError, Result, UpstreamError};
pub use request::{RequestBuilder, SUPPORTED_METHODS, ensure_supported};
pub use resource::{Registry, Resource};
pub use response::Response;
pub use runner::run_cancellable;
pub use selector::{Selection, Visited, select_next};
pub use urls::{construct_query_url, construct_url};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use armature_upstream::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backoff::Backoff;
    pub use crate::balancer::{LoadBalancer, RetryPolicy};
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitState};
    pub use crate::client::UpstreamClient;
    pub use crate::config::{UpstreamConfig, UpstreamConfigBuilder};
    pub use crate::error::{Result, UpstreamError};
    pub use crate::request::RequestBuilder;
    pub use crate::resource::Resource;
    pub use crate::response::Response;
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
    pub use tokio_util::sync::CancellationToken;
}
