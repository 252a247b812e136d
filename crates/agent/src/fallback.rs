//! Fallback reasoner: explains why a turn found nothing.
//!
//! Runs once the tool-selection loop has spent its budget. The model is asked
//! to explain the failure from the trace and the evidence it saw; when the
//! gateway yields nothing usable a deterministic summary of the tool log is
//! used instead, so provider error payloads never reach the user.

use serde::{Deserialize, Serialize};
use sift_core::message::Message;
use sift_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::ContextFragment;
use crate::json::JsonAssembler;
use crate::prompts;
use crate::trace::ReasoningTrace;

/// Evidence titles listed in the prompt at most.
const MAX_LISTED_FRAGMENTS: usize = 10;

/// Why retrieval failed, for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureExplanation {
    pub reasoning: String,
    pub tool_calls: usize,
    pub failed_calls: usize,
    pub fragments_seen: usize,
}

pub struct FallbackReasoner {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

impl FallbackReasoner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Explain the failure. Never fails.
    pub async fn explain(
        &self,
        query: &str,
        trace: &ReasoningTrace,
        fragments: &[ContextFragment],
    ) -> FailureExplanation {
        let reasoning = match self.ask(query, trace, fragments).await {
            Some(text) => text,
            None => summarize(query, trace, fragments),
        };
        FailureExplanation {
            reasoning,
            tool_calls: trace.tool_calls.len(),
            failed_calls: trace.failed_calls(),
            fragments_seen: fragments.len(),
        }
    }

    async fn ask(&self, query: &str, trace: &ReasoningTrace, fragments: &[ContextFragment]) -> Option<String> {
        let mut content = format!("Question: {query}\n\n{}", trace.render());
        if !fragments.is_empty() {
            content.push_str("## Evidence Seen\n");
            for fragment in fragments.iter().take(MAX_LISTED_FRAGMENTS) {
                content.push_str(&format!(
                    "- [{}] {} ({})\n",
                    fragment.citation.index, fragment.citation.title, fragment.citation.entity
                ));
            }
        }

        let request = ProviderRequest::new(&self.model, vec![Message::user(content)])
            .with_system_prompt(prompts::FALLBACK)
            .with_temperature(0.2)
            .with_json_output();

        let response = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Fallback reasoning call failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Fallback reasoning call timed out");
                return None;
            }
        };

        let raw = response.message.content.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = JsonAssembler::new()
            .with_expected_key("reasoning")
            .assemble(raw)
            .ok()
            .and_then(|map| map.get("reasoning").and_then(|v| v.as_str()).map(str::to_string))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if parsed.is_none() {
            debug!("Fallback reply was not structured; using raw text");
        }
        Some(parsed.unwrap_or_else(|| raw.to_string()))
    }
}

/// Deterministic explanation built from the tool log alone.
pub fn summarize(query: &str, trace: &ReasoningTrace, fragments: &[ContextFragment]) -> String {
    let calls = trace.tool_calls.len();
    if calls == 0 {
        return format!("I couldn't search for \"{query}\": no retrieval tool could be run.");
    }

    let mut out = format!(
        "I couldn't find an answer to \"{query}\" after {calls} search{}",
        if calls == 1 { "" } else { "es" }
    );
    match trace.failed_calls() {
        0 => out.push('.'),
        n if n == calls => out.push_str(", and every one of them failed."),
        n => out.push_str(&format!(" ({n} failed).")),
    }

    if fragments.is_empty() {
        out.push_str(" Nothing matching came back; try different keywords or name the app it lives in.");
    } else {
        out.push_str(&format!(
            " {} result{} came back but none of them answered the question; try naming the document, sender or date.",
            fragments.len(),
            if fragments.len() == 1 { "" } else { "s" }
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response};
    use crate::trace::{CallStatus, ToolCallRecord};
    use chrono::Utc;
    use sift_core::error::ProviderError;

    fn trace_with(statuses: &[CallStatus]) -> ReasoningTrace {
        let mut trace = ReasoningTrace::new();
        for (i, status) in statuses.iter().enumerate() {
            trace.record_call(ToolCallRecord {
                iteration: i + 1,
                tool: "search".into(),
                arguments: serde_json::json!({"query": "roadmap"}),
                status: *status,
                records: 0,
                new_records: 0,
                error: None,
                duration_ms: 1,
                timestamp: Utc::now(),
            });
        }
        trace
    }

    #[tokio::test]
    async fn parses_structured_reasoning() {
        let provider = Arc::new(SequentialMockProvider::single_text(
            r#"```json
{"reasoning": "No document mentions a 2027 roadmap."}
```"#,
        ));
        let reasoner = FallbackReasoner::new(provider.clone(), "m");
        let trace = trace_with(&[CallStatus::Succeeded, CallStatus::Failed]);
        let explanation = reasoner.explain("2027 roadmap", &trace, &[]).await;

        assert_eq!(explanation.reasoning, "No document mentions a 2027 roadmap.");
        assert_eq!(explanation.tool_calls, 2);
        assert_eq!(explanation.failed_calls, 1);
        assert_eq!(explanation.fragments_seen, 0);
        let request = &provider.requests()[0];
        assert!(request.json_output);
        assert!(request.messages[0].content.contains("2027 roadmap"));
    }

    #[tokio::test]
    async fn prose_reply_is_used_verbatim() {
        let provider = Arc::new(SequentialMockProvider::single_text(
            "Nothing in your drive matches that name.",
        ));
        let reasoner = FallbackReasoner::new(provider, "m");
        let explanation = reasoner.explain("q", &trace_with(&[CallStatus::Succeeded]), &[]).await;
        assert_eq!(explanation.reasoning, "Nothing in your drive matches that name.");
    }

    #[tokio::test]
    async fn gateway_failure_uses_summary() {
        let provider = Arc::new(SequentialMockProvider::failing(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded: stack trace ...".into(),
        }));
        let reasoner = FallbackReasoner::new(provider, "m");
        let trace = trace_with(&[CallStatus::Failed, CallStatus::TimedOut]);
        let explanation = reasoner.explain("roadmap", &trace, &[]).await;
        assert!(explanation.reasoning.contains("after 2 searches, and every one of them failed"));
        assert!(!explanation.reasoning.contains("exploded"));
    }

    #[tokio::test]
    async fn empty_reply_uses_summary() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("  ")]));
        let reasoner = FallbackReasoner::new(provider, "m");
        let explanation = reasoner.explain("roadmap", &trace_with(&[CallStatus::Succeeded]), &[]).await;
        assert_eq!(
            explanation.reasoning,
            "I couldn't find an answer to \"roadmap\" after 1 search. Nothing matching came back; \
             try different keywords or name the app it lives in."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out_to_summary() {
        let provider = Arc::new(
            SequentialMockProvider::single_text(r#"{"reasoning": "late"}"#)
                .with_delay(Duration::from_secs(120)),
        );
        let reasoner = FallbackReasoner::new(provider, "m").with_timeout(Duration::from_secs(5));
        let explanation = reasoner.explain("q", &ReasoningTrace::new(), &[]).await;
        assert!(explanation.reasoning.contains("no retrieval tool could be run"));
    }

    #[test]
    fn summary_counts_partial_failures() {
        let trace = trace_with(&[CallStatus::Succeeded, CallStatus::Failed, CallStatus::Succeeded]);
        let text = summarize("q", &trace, &[]);
        assert!(text.contains("after 3 searches (1 failed)."));
    }
}
