//! Upstream HTTP client.

use http::Method;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resource::Resource;
use crate::{LoadBalancer, RequestBuilder, Result, UpstreamConfig, UpstreamError};

/// HTTP client that spreads requests over a fixed pool of upstream hosts.
///
/// Every host carries its own circuit breaker; a call tries up to
/// `retry_max_server_pick` hosts and retries each up to
/// `retry_max_retry_per_server` times. Clones share the connection pool and
/// the host health records.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: reqwest::Client,
    balancer: Arc<LoadBalancer>,
    config: Arc<UpstreamConfig>,
}

impl UpstreamClient {
    /// Create a client for `hosts`, each an absolute base URL such as
    /// `http://10.0.0.1:8080`.
    pub fn new<I, S>(hosts: I, config: UpstreamConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;

        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| UpstreamError::InvalidConfig(format!("HTTP transport: {}", e)))?;

        Self::with_client(inner, hosts, config)
    }

    /// Create a client around an existing reqwest client.
    ///
    /// The transport settings of `config` are ignored.
    pub fn with_client<I, S>(
        inner: reqwest::Client,
        hosts: I,
        config: UpstreamConfig,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let balancer = LoadBalancer::try_new(hosts, &config)?;
        debug!(
            hosts = balancer.registry().len(),
            max_server_pick = config.retry_max_server_pick,
            max_retry_per_server = config.retry_max_retry_per_server,
            "Upstream client created"
        );

        Ok(Self {
            inner,
            balancer: Arc::new(balancer),
            config: Arc::new(config),
        })
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Get the client configuration.
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Get the load balancer.
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Upstream hosts in registration order.
    pub fn resources(&self) -> &[Arc<Resource>] {
        self.balancer.registry().resources()
    }

    /// Create a GET request builder.
    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    /// Create a HEAD request builder.
    pub fn head(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    /// Create a POST request builder.
    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    /// Create a PUT request builder.
    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// Create a POST request with a form-encoded body.
    pub fn post_form<T: Serialize + ?Sized>(
        &self,
        path: impl Into<String>,
        form: &T,
    ) -> RequestBuilder<'_> {
        self.post(path).form(form)
    }

    /// Create a request builder with a custom method.
    ///
    /// Methods outside the supported set fail when the request is sent.
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    /// Run arbitrary work against the upstream hosts under the client's
    /// retry and breaker rules.
    pub async fn submit<F, Fut, T>(&self, token: &CancellationToken, work: F) -> Result<T>
    where
        F: FnMut(Arc<Resource>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.balancer.submit(token, work).await
    }
}
