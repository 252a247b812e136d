//! Gateway fallback: ordered retry chain with per-backend timeouts.
//!
//! When a backend fails (timeout, rate limit, error), the next backend in the
//! configured chain is tried. Only when every backend fails does the caller
//! see a gateway error.

use async_trait::async_trait;
use sift_core::error::ProviderError;
use sift_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(120);

/// A provider that wraps an ordered list of providers and falls back on failure.
pub struct FallbackProvider {
    name: String,
    chain: Vec<FallbackEntry>,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

impl FallbackProvider {
    /// Create a new fallback provider with no entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Add a provider to the fallback chain with a custom timeout.
    pub fn add(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry { provider, timeout });
        self
    }

    /// Add a provider with the default timeout (120s).
    pub fn add_default(self, provider: Arc<dyn Provider>) -> Self {
        self.add(provider, DEFAULT_ENTRY_TIMEOUT)
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Names of the chained providers, in try order.
    pub fn members(&self) -> Vec<&str> {
        self.chain.iter().map(|e| e.provider.name()).collect()
    }

    /// Run `call` against each entry until one succeeds.
    async fn try_each<T, F, Fut>(&self, op: &str, call: F) -> std::result::Result<T, ProviderError>
    where
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();

            info!(
                provider = %provider_name,
                op,
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );

            match tokio::time::timeout(entry.timeout, call(entry.provider.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        op,
                        error = %e,
                        "Fallback: provider failed, trying next"
                    );
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        op,
                        timeout_secs = entry.timeout.as_secs(),
                        "Fallback: provider timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.try_each("complete", |provider| {
            let request = request.clone();
            async move { provider.complete(request).await }
        })
        .await
    }

    /// Falls back only while opening the stream; once chunks flow, errors
    /// inside the stream are the caller's to handle.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        self.try_each("stream", |provider| {
            let request = request.clone();
            async move { provider.stream(request).await }
        })
        .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        for entry in &self.chain {
            if let Ok(true) = entry.provider.health_check().await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
