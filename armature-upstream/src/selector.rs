//! Host selection.
//!
//! The first host in registry order that has not been tried in this call and
//! whose breaker admits the attempt wins. Two concurrent calls may pick the
//! same host; the breaker, not the selector, limits half-open traffic.

use crate::circuit_breaker::Admission;
use crate::resource::{Registry, Resource};
use std::sync::Arc;
use tracing::trace;

/// Hosts already tried during one call.
#[derive(Debug, Clone)]
pub struct Visited {
    seen: Vec<bool>,
}

impl Visited {
    /// Create an empty set for a registry of `len` hosts.
    pub fn new(len: usize) -> Self {
        Self {
            seen: vec![false; len],
        }
    }

    /// Mark a host as tried.
    pub fn insert(&mut self, resource: &Resource) {
        if let Some(slot) = self.seen.get_mut(resource.index()) {
            *slot = true;
        }
    }

    /// Check if a host was tried.
    pub fn contains(&self, resource: &Resource) -> bool {
        self.seen.get(resource.index()).copied().unwrap_or(false)
    }

    /// Number of hosts tried.
    pub fn len(&self) -> usize {
        self.seen.iter().filter(|s| **s).count()
    }

    /// Check if no host was tried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A host admitted for the next attempt.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen host.
    pub resource: Arc<Resource>,
    /// How the breaker admitted it.
    pub admission: Admission,
}

impl Selection {
    /// Check if this attempt is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.admission.is_probe()
    }
}

/// Pick the next eligible host, or `None` when every host is visited or open.
pub fn select_next(registry: &Registry, visited: &Visited) -> Option<Selection> {
    registry
        .resources()
        .iter()
        .filter(|resource| !visited.contains(resource))
        .find_map(|resource| match resource.try_acquire() {
            Admission::Rejected => {
                trace!(resource = %resource.id(), "Skipping host with open breaker");
                None
            }
            admission => Some(Selection {
                resource: resource.clone(),
                admission,
            }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerSettings;
    use std::time::Duration;

    fn registry() -> Registry {
        let settings = BreakerSettings {
            successive_fail_threshold: 1,
            tripped_base_time: Duration::from_secs(60),
            tripped_time_max: Duration::from_secs(60),
            ..Default::default()
        };
        Registry::new(["http://a", "http://b", "http://c"], settings)
    }

    #[test]
    fn test_picks_first_unvisited() {
        let registry = registry();
        let mut visited = Visited::new(registry.len());

        let first = select_next(&registry, &visited).unwrap();
        assert_eq!(first.resource.id(), "http://a");
        assert_eq!(first.admission, Admission::Admitted);

        visited.insert(&first.resource);
        let second = select_next(&registry, &visited).unwrap();
        assert_eq!(second.resource.id(), "http://b");
    }

    #[test]
    fn test_skips_open_breaker() {
        let registry = registry();
        registry.resources()[0].record_failure();

        let visited = Visited::new(registry.len());
        let pick = select_next(&registry, &visited).unwrap();
        assert_eq!(pick.resource.id(), "http://b");
    }

    #[test]
    fn test_exhausted() {
        let registry = registry();
        let mut visited = Visited::new(registry.len());
        visited.insert(&registry.resources()[0]);
        visited.insert(&registry.resources()[1]);
        registry.resources()[2].record_failure();

        assert!(select_next(&registry, &visited).is_none());
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_empty_registry() {
        let registry = Registry::new(Vec::<String>::new(), BreakerSettings::default());
        let visited = Visited::new(0);
        assert!(visited.is_empty());
        assert!(select_next(&registry, &visited).is_none());
    }
}
