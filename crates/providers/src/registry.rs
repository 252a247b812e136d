//! Provider registry: the model gateways built once at process start.
//!
//! The registry is constructed from configuration and handed to the
//! orchestrator by reference; nothing looks providers up through globals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sift_core::error::ProviderError;
use sift_core::provider::Provider;
use tracing::debug;

use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Registered gateways, keyed by backend name.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    default_provider: String,
    fallback_chain: Vec<String>,
    fallback_timeout: Duration,
}

impl ProviderRegistry {
    /// Create an empty registry whose default is `default_provider`.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider: default_provider.into(),
            fallback_chain: Vec::new(),
            fallback_timeout: Duration::from_secs(120),
        }
    }

    /// Backends to try, in order, after the default one fails.
    pub fn with_fallback_chain(mut self, chain: Vec<String>, timeout: Duration) -> Self {
        self.fallback_chain = chain;
        self.fallback_timeout = timeout;
        self
    }

    /// Register a provider. Replaces any existing one with the same name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// The gateway the orchestrator should talk to.
    ///
    /// With a fallback chain configured this is a [`FallbackProvider`] over the
    /// default backend followed by the chain; unknown chain entries are skipped.
    pub fn gateway(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        let primary = self
            .get(&self.default_provider)
            .ok_or_else(|| ProviderError::NotConfigured(self.default_provider.clone()))?;

        if self.fallback_chain.is_empty() {
            return Ok(primary);
        }

        let mut fallback =
            FallbackProvider::new(format!("{}+fallback", self.default_provider))
                .add(primary, self.fallback_timeout);
        for name in &self.fallback_chain {
            match self.get(name) {
                Some(provider) => fallback = fallback.add(provider, self.fallback_timeout),
                None => debug!(provider = %name, "Skipping unregistered fallback provider"),
            }
        }
        Ok(Arc::new(fallback))
    }

    /// List all registered provider names.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build the registry from configuration.
///
/// Every configured backend is registered, plus the default and each fallback
/// backend even when they have no `[providers.*]` section of their own.
pub fn build_from_config(config: &sift_config::AppConfig) -> ProviderRegistry {
    let timeout = Duration::from_secs(config.orchestrator.model_timeout_secs);
    let mut registry = ProviderRegistry::new(&config.default_provider)
        .with_fallback_chain(config.fallback_chain.clone(), timeout);

    let implicit = std::iter::once(&config.default_provider).chain(&config.fallback_chain);
    let names: std::collections::BTreeSet<&String> =
        config.providers.keys().chain(implicit).collect();

    for name in names {
        let provider_config = config.providers.get(name.as_str());
        let api_key = config.api_key_for(name).unwrap_or_default();
        let base_url = provider_config
            .and_then(|p| p.api_url.clone())
            .unwrap_or_else(|| default_base_url(name));
        let timeout_secs = provider_config
            .and_then(|p| p.timeout_secs)
            .unwrap_or(config.orchestrator.model_timeout_secs);

        debug!(provider = %name, base_url = %base_url, "Registering provider");
        registry.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::with_timeout(
                name.as_str(),
                base_url,
                api_key,
                timeout_secs,
            )),
        );
    }

    registry
}

/// Get the default base URL for well-known backends.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
