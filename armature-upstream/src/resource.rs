//! Upstream hosts and their health records.

use crate::circuit_breaker::{BreakerSettings, CircuitBreaker};
use crate::error::{Result, UpstreamError};
use std::ops::Deref;
use std::sync::Arc;
use url::Url;

/// A single upstream host.
#[derive(Debug)]
pub struct Resource {
    id: String,
    index: usize,
    breaker: CircuitBreaker,
}

impl Resource {
    /// Create a resource for `host` at position `index` of its registry.
    pub fn new(host: impl Into<String>, index: usize, settings: BreakerSettings) -> Self {
        let id = host.into();
        Self {
            breaker: CircuitBreaker::new(id.clone(), settings),
            id,
            index,
        }
    }

    /// Host string, e.g. `http://10.0.0.1:8080`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position in the registry.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The host's circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Join the host with a request path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.id, path)
    }
}

impl Deref for Resource {
    type Target = CircuitBreaker;
    fn deref(&self) -> &Self::Target {
        &self.breaker
    }
}

/// Ordered, immutable set of upstream hosts.
#[derive(Debug, Clone)]
pub struct Registry {
    resources: Arc<[Arc<Resource>]>,
}

impl Registry {
    /// Build a registry without validating host strings.
    pub fn new<I, S>(hosts: I, settings: BreakerSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resources = hosts
            .into_iter()
            .enumerate()
            .map(|(index, host)| Arc::new(Resource::new(host, index, settings)))
            .collect::<Vec<_>>();
        Self {
            resources: resources.into(),
        }
    }

    /// Build a registry, rejecting hosts that are not absolute URLs.
    pub fn parse<I, S>(hosts: I, settings: BreakerSettings) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts = hosts.into_iter().map(Into::into).collect::<Vec<String>>();
        for host in &hosts {
            Url::parse(host).map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", host, e)))?;
        }
        Ok(Self::new(hosts, settings))
    }

    /// All resources in registry order.
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// Look up a resource by host string.
    pub fn get(&self, id: &str) -> Option<&Arc<Resource>> {
        self.resources.iter().find(|r| r.id() == id)
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if the registry has no hosts.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
