//! Model-backed router with rule-based normalization and fallback.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sift_core::error::ProviderError;
use sift_core::message::{Conversation, Message, Utterance};
use sift_core::provider::{Provider, ProviderRequest};
use sift_core::query::{Entity, QueryClassification, QueryFilters, Route, TemporalDirection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::lexicon::{self, Token};
use super::{QueryRouter, RuleRouter, followup};
use crate::json::JsonAssembler;
use crate::prompts;

/// Longest slice of the previous answer sent along for reference resolution.
const PREVIOUS_ANSWER_CHARS: usize = 1500;

#[derive(Debug, Default, Deserialize)]
struct RouterOutput {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    conversational: bool,
    #[serde(default)]
    is_follow_up: bool,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default)]
    temporal_direction: Option<TemporalDirection>,
    #[serde(default)]
    filters: QueryFilters,
}

/// Asks the model for a structured classification.
///
/// Output that cannot be parsed falls back to the [`RuleRouter`]; gateway
/// failures are returned to the caller.
pub struct ModelRouter {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
    fallback: RuleRouter,
}

impl ModelRouter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(60),
            fallback: RuleRouter::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: RuleRouter) -> Self {
        self.fallback = fallback;
        self
    }

    fn request(&self, text: &str, previous: Option<&str>) -> ProviderRequest {
        let mut content = String::new();
        if let Some(previous) = previous {
            let clipped: String = previous.chars().take(PREVIOUS_ANSWER_CHARS).collect();
            content.push_str(&format!("Previous assistant answer:\n{clipped}\n\n"));
        }
        content.push_str(&format!("User query: {text}"));

        ProviderRequest::new(&self.model, vec![Message::user(content)])
            .with_system_prompt(prompts::router(Utc::now()))
            .with_temperature(0.0)
            .with_json_output()
    }
}

#[async_trait]
impl QueryRouter for ModelRouter {
    fn name(&self) -> &str {
        "model"
    }

    async fn route(&self, utterance: &Utterance, conversation: &Conversation) -> sift_core::Result<Route> {
        let text = utterance.text.trim();
        let tokens = lexicon::tokenize(text);
        if tokens.is_empty() {
            return Ok(self.fallback.classify(utterance, conversation));
        }

        let previous = conversation.preceding_assistant_turn().map(|m| m.content.as_str());
        let request = self.request(text, previous);

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "router call to '{}' exceeded {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                ))
            })??;

        match JsonAssembler::new().assemble_as::<RouterOutput>(&response.message.content) {
            Ok(output) => {
                let route = normalize(output, &tokens, previous.is_some());
                debug!(route = ?route, "model router classified utterance");
                Ok(route)
            }
            Err(e) => {
                warn!(error = %e, "Router output unusable, falling back to rules");
                Ok(self.fallback.classify(utterance, conversation))
            }
        }
    }
}

/// Enforce routing invariants on model output, whatever the model said.
fn normalize(output: RouterOutput, tokens: &[Token<'_>], has_previous: bool) -> Route {
    if let Some(answer) = output.answer.filter(|a| !a.trim().is_empty()) {
        return Route::DirectAnswer(answer);
    }
    if output.conversational {
        return Route::Conversational;
    }

    let mut filters = output.filters;
    filters.apps.dedup();
    filters.entities.dedup();
    filters.filter_query = filters
        .filter_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("null"));
    for list in [
        &mut filters.participants.from,
        &mut filters.participants.to,
        &mut filters.participants.cc,
        &mut filters.participants.bcc,
    ] {
        list.retain(|p| !p.trim().is_empty());
    }
    filters.count = filters.count.map(|n| n.clamp(1, 100));

    let temporal_direction = output
        .temporal_direction
        .filter(|_| filters.single_entity() == Some(Entity::Event));

    // A follow-up needs an explicit marker and an answer to refer back to.
    let is_follow_up = output.is_follow_up && has_previous && followup::has_marker(tokens);
    let rewritten_query = output
        .rewritten_query
        .filter(|q| is_follow_up && !q.trim().is_empty());

    let mut classification = QueryClassification::from_filters(filters);
    classification.is_follow_up = is_follow_up;
    classification.rewritten_query = rewritten_query;
    classification.temporal_direction = temporal_direction;
    Route::Retrieve(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response};
    use sift_core::query::{App, Intent};

    fn router(reply: &str) -> ModelRouter {
        ModelRouter::new(Arc::new(SequentialMockProvider::single_text(reply)), "mock-model")
    }

    #[tokio::test]
    async fn parses_fenced_classification() {
        let reply = "```json\n{\"is_follow_up\": false, \"filters\": {\"apps\": [\"gmail\"], \"entities\": [\"message\"], \"sort_direction\": \"desc\"}}\n```";
        let route = router(reply)
            .route(&Utterance::new("latest emails"), &Conversation::new())
            .await
            .unwrap();
        let c = route.classification().unwrap();
        assert_eq!(c.filters.apps, vec![App::Mail]);
        assert_eq!(c.intent, Intent::GetItems);
    }

    #[tokio::test]
    async fn direct_answer_wins() {
        let route = router(r#"{"answer": "Hello!", "filters": {"apps": ["mail"]}}"#)
            .route(&Utterance::new("who are you"), &Conversation::new())
            .await
            .unwrap();
        assert_eq!(route, Route::DirectAnswer("Hello!".into()));
    }

    #[tokio::test]
    async fn invariants_are_enforced() {
        let reply = r#"{"is_follow_up": true, "rewritten_query": "Q3 budget", "temporal_direction": "next",
            "filters": {"apps": ["mail"], "entities": ["message"], "filter_query": "  ", "count": 500}}"#;
        let route = router(reply)
            .route(&Utterance::new("emails about budget"), &Conversation::new())
            .await
            .unwrap();
        let c = route.classification().unwrap();
        assert!(!c.is_follow_up);
        assert_eq!(c.rewritten_query, None);
        assert_eq!(c.temporal_direction, None);
        assert_eq!(c.filters.filter_query, None);
        assert_eq!(c.filters.count, Some(100));
        assert_eq!(c.intent, Intent::GetItems);
    }

    #[tokio::test]
    async fn follow_up_kept_with_marker_and_previous_answer() {
        let mut conversation = Conversation::new();
        conversation.push(Message::assistant("I found **Q3 Budget Review**."));
        let reply = r#"{"is_follow_up": true, "rewritten_query": "who owns Q3 Budget Review", "filters": {}}"#;
        let route = router(reply)
            .route(&Utterance::new("who owns it"), &conversation)
            .await
            .unwrap();
        let c = route.classification().unwrap();
        assert!(c.is_follow_up);
        assert_eq!(c.rewritten_query.as_deref(), Some("who owns Q3 Budget Review"));
    }

    #[tokio::test]
    async fn unparseable_output_falls_back_to_rules() {
        let route = router("I think they want emails")
            .route(&Utterance::new("current emails"), &Conversation::new())
            .await
            .unwrap();
        let c = route.classification().unwrap();
        assert_eq!(c.filters.apps, vec![App::Mail]);
        assert_eq!(c.intent, Intent::GetItems);
    }

    #[tokio::test]
    async fn gateway_failure_is_surfaced() {
        let provider = SequentialMockProvider::failing(ProviderError::Network("connection refused".into()));
        let err = ModelRouter::new(Arc::new(provider), "mock-model")
            .route(&Utterance::new("current emails"), &Conversation::new())
            .await
            .unwrap_err();
        assert!(matches!(err, sift_core::Error::Provider(ProviderError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_timeout_is_surfaced() {
        let provider = SequentialMockProvider::new(vec![make_text_response("{}")]).with_delay(Duration::from_secs(30));
        let err = ModelRouter::new(Arc::new(provider), "mock-model")
            .with_timeout(Duration::from_secs(5))
            .route(&Utterance::new("current emails"), &Conversation::new())
            .await
            .unwrap_err();
        assert!(matches!(err, sift_core::Error::Provider(ProviderError::Timeout(_))));
    }
}
