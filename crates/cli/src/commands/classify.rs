//! `sift classify`: show how a query would be routed.

use sift_config::AppConfig;
use sift_core::message::{Conversation, Utterance};

use super::CliResult;

pub async fn run(config: &AppConfig, query: &str, use_model: bool) -> CliResult {
    let provider = if use_model { Some(super::gateway(config)?) } else { None };
    let mut config = config.clone();
    config.orchestrator.model_router = use_model;

    let router = super::router(&config, provider);
    let route = router
        .route(&Utterance::new(query), &Conversation::new())
        .await?;
    tracing::debug!(router = router.name(), "Classified query");
    println!("{}", serde_json::to_string_pretty(&route)?);
    Ok(())
}
