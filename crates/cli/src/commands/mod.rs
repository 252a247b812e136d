//! Subcommand implementations and the wiring they share.

pub mod ask;
pub mod classify;
pub mod config_cmd;

use sift_agent::{ModelRouter, QueryRouter, RuleRouter};
use sift_config::AppConfig;
use sift_core::provider::Provider;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the config at `path` with environment overrides applied.
pub fn load_config(path: &Path) -> CliResult<AppConfig> {
    AppConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// The configured model gateway, with its fallback chain.
pub fn gateway(config: &AppConfig) -> CliResult<Arc<dyn Provider>> {
    if !config.has_api_key() && !is_local(&config.default_provider) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SIFT_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }
    let registry = sift_providers::build_from_config(config);
    tracing::debug!(provider = registry.default_name(), backends = ?registry.names(), "Provider registry built");
    Ok(registry.gateway()?)
}

/// The router the config asks for. The model router falls back to the word
/// tables when its output is unusable.
pub fn router(config: &AppConfig, provider: Option<Arc<dyn Provider>>) -> Arc<dyn QueryRouter> {
    match provider {
        Some(provider) if config.orchestrator.model_router => Arc::new(
            ModelRouter::new(provider, &config.default_model)
                .with_timeout(Duration::from_secs(config.orchestrator.model_timeout_secs))
                .with_fallback(RuleRouter::new()),
        ),
        _ => Arc::new(RuleRouter::new()),
    }
}

fn is_local(provider: &str) -> bool {
    matches!(provider, "ollama" | "vllm")
}
