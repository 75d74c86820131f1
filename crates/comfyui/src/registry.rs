//! Static registry of render backend endpoints.
//!
//! Built once from configuration and never mutated afterwards, so it
//! can be shared behind an `Arc` and read from any number of tasks.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::types::BackendIndex;

use crate::api::{ComfyUIApi, DEFAULT_REQUEST_TIMEOUT};

/// Endpoint used when configuration lists none.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8188";

/// Ordered list of backend endpoints and their API clients.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<ComfyUIApi>>,
}

/// Split a comma-separated endpoint list, dropping blanks and trailing slashes.
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl BackendRegistry {
    /// Build a registry with the default request timeout.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self::with_timeout(endpoints, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a registry whose clients give up after `timeout`.
    ///
    /// An empty list falls back to [`DEFAULT_ENDPOINT`]. All clients share
    /// one connection pool.
    pub fn with_timeout(endpoints: Vec<String>, timeout: Duration) -> Self {
        let endpoints = if endpoints.is_empty() {
            tracing::warn!(endpoint = DEFAULT_ENDPOINT, "No backends configured, using default");
            vec![DEFAULT_ENDPOINT.to_string()]
        } else {
            endpoints
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        let backends = endpoints
            .into_iter()
            .map(|endpoint| Arc::new(ComfyUIApi::with_client(client.clone(), endpoint)))
            .collect();

        Self { backends }
    }

    /// Number of configured backends (always at least one).
    pub fn count(&self) -> usize {
        self.backends.len()
    }

    /// Base URL of the backend at `index`.
    pub fn endpoint_at(&self, index: BackendIndex) -> Option<&str> {
        self.backends.get(index).map(|api| api.api_url())
    }

    /// API client of the backend at `index`.
    pub fn api_at(&self, index: BackendIndex) -> Option<Arc<ComfyUIApi>> {
        self.backends.get(index).cloned()
    }

    /// Iterate `(index, client)` pairs in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (BackendIndex, &Arc<ComfyUIApi>)> {
        self.backends.iter().enumerate()
    }

    /// All endpoints in registry order.
    pub fn endpoints(&self) -> Vec<String> {
        self.backends.iter().map(|api| api.api_url().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoints_trims_and_drops_blanks() {
        assert_eq!(
            parse_endpoints(" http://a:8188/ , ,http://b:8188"),
            vec!["http://a:8188".to_string(), "http://b:8188".to_string()]
        );
    }

    #[test]
    fn empty_registry_falls_back_to_default() {
        let registry = BackendRegistry::new(Vec::new());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.endpoint_at(0), Some(DEFAULT_ENDPOINT));
    }

    #[test]
    fn endpoint_lookup_preserves_order() {
        let registry = BackendRegistry::new(vec!["http://a".into(), "http://b".into()]);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.endpoint_at(1), Some("http://b"));
        assert_eq!(registry.endpoint_at(2), None);
        assert!(registry.api_at(5).is_none());
    }
}
