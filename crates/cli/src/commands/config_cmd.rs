//! `sift config`: configuration management commands.

use sift_config::AppConfig;
use std::path::Path;

use super::CliResult;

const REDACTED: &str = "[REDACTED]";

pub fn show(path: &Path) -> CliResult {
    let mut config = super::load_config(path)?;
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(path: &Path, force: bool) -> CliResult {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

pub fn validate(path: &Path) -> CliResult {
    println!("Validating {}", path.display());

    let config = match AppConfig::load_with_env(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ✗ {e}");
            return Err(e.into());
        }
    };
    println!("   ✓ Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✓ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ! {w}");
        }
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.default_model);
    println!("   Fallbacks:  {}", config.fallback_chain.join(", "));
    println!("   Router:     {}", if config.orchestrator.model_router { "model" } else { "rules" });
    println!("   Iterations: {}", config.orchestrator.max_iterations);
    Ok(())
}

/// Settings that load fine but will likely misbehave.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (SIFT_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)".to_string());
    }
    if config.principal.is_none() {
        warnings.push("No principal set; restricted records will never be returned".to_string());
    }
    for name in &config.fallback_chain {
        if !config.providers.contains_key(name) && config.api_key_for(name).is_none() {
            warnings.push(format!("Fallback backend '{name}' has no API key"));
        }
    }
    if config.orchestrator.tool_timeout_secs > config.orchestrator.model_timeout_secs {
        warnings.push("tool_timeout_secs exceeds model_timeout_secs".to_string());
    }
    warnings
}
