//! End-to-end integration tests for the Sift orchestration engine.
//!
//! These tests exercise the full pipeline from utterance to outcome: rule
//! routing, pre-selection, the real retrieval tools over the in-memory
//! backend, context assembly and synthesis, with a scripted model gateway.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sift_agent::{
    LoopConfig, LoopEvent, PlanSource, RuleRouter, Termination, ToolSelectionLoop,
};
use sift_core::error::ProviderError;
use sift_core::message::{Attachment, Conversation, Message, MessageToolCall, Utterance};
use sift_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use sift_core::query::{App, Entity};
use sift_core::record::{FileRecord, MailRecord, RetrievedRecord, ScoredChunk};
use sift_tools::{InMemorySearchBackend, default_registry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<ProviderResponse>>,
    call_count: std::sync::Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        if *count >= responses.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                *count,
                responses.len()
            );
        }
        let resp = responses[*count].clone();
        *count += 1;
        Ok(resp)
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        cost: None,
        model: "mock".into(),
    }
}

fn tool_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut response = text_response("");
    response.message.tool_calls = tool_calls;
    response
}

fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

fn answer(text: &str, status: &str, candidates: &[usize]) -> ProviderResponse {
    text_response(
        &serde_json::json!({"answer": text, "status": status, "candidates": candidates}).to_string(),
    )
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn file(id: &str, title: &str, body: &str) -> RetrievedRecord {
    RetrievedRecord::File(FileRecord {
        id: id.into(),
        title: title.into(),
        url: Some(format!("https://drive.example.com/{id}")),
        owner: Some("Ana Lima".into()),
        owner_email: Some("ana@example.com".into()),
        mime_type: None,
        created_at: None,
        updated_at: None,
        relevance: 0.5,
        chunks: vec![ScoredChunk::new(0, body, 0.0)],
    })
}

fn mail(id: &str, subject: &str, day: u32) -> RetrievedRecord {
    RetrievedRecord::Mail(MailRecord {
        id: id.into(),
        subject: subject.into(),
        thread_id: None,
        from: Some("dana@example.com".into()),
        to: vec!["ana@example.com".into()],
        cc: vec![],
        bcc: vec![],
        labels: vec![],
        timestamp: Some(Utc.with_ymd_and_hms(2026, 4, day, 9, 0, 0).unwrap()),
        relevance: 0.4,
        chunks: vec![ScoredChunk::new(0, format!("{subject} details"), 0.0)],
    })
}

fn corpus() -> Vec<RetrievedRecord> {
    vec![
        file("f1", "Q3 Budget", "Spend grows 12% in Q3, mostly hiring."),
        file("f2", "Vendor contract review", "We decided to renew the vendor contract for two years."),
        mail("m1", "Offsite logistics", 1),
        mail("m2", "Offsite agenda", 3),
    ]
}

fn engine(provider: Arc<ScriptedProvider>, backend: InMemorySearchBackend) -> ToolSelectionLoop {
    let tools = Arc::new(default_registry(Arc::new(backend)));
    ToolSelectionLoop::new(provider, tools, Arc::new(RuleRouter::new()))
        .with_config(LoopConfig {
            model: "mock".into(),
            ..LoopConfig::default()
        })
        .with_principal("ana@example.com")
}

// ── E2E: Routing shortcuts ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_clock_question_needs_no_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let engine = engine(provider.clone(), InMemorySearchBackend::with_records(corpus()));

    let outcome = engine
        .run(&Utterance::new("What day is it?"), &Conversation::new(), None, &CancellationToken::new())
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.termination, Termination::Answered);
    assert!(outcome.answer.unwrap().starts_with("Today is"));
    assert_eq!(provider.calls(), 0);
}

// ── E2E: Retrieval ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_listing_reads_newest_mail_first() {
    let provider = Arc::new(ScriptedProvider::new(vec![answer(
        "Your newest email is \"Offsite agenda\" [0].",
        "answered",
        &[],
    )]));
    let engine = engine(provider.clone(), InMemorySearchBackend::with_records(corpus()));

    let outcome = engine
        .run(&Utterance::new("current emails"), &Conversation::new(), None, &CancellationToken::new())
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.termination, Termination::Answered);
    assert_eq!(provider.calls(), 1);
    let call = &outcome.state.trace.tool_calls[0];
    assert_eq!(call.tool, "get_items");
    assert_eq!(call.arguments["app"], "mail");
    assert_eq!(outcome.state.record_ids(), vec!["m2", "m1"]);
    assert_eq!(outcome.citations[0].id, "m2");
}

#[tokio::test]
async fn e2e_model_chooses_search_then_answers() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![make_tool_call("search", serde_json::json!({"query": "vendor contract"}))]),
        answer("You decided to renew it for two years [0].", "answered", &[]),
    ]));
    let engine = engine(provider.clone(), InMemorySearchBackend::with_records(corpus()));

    let (tx, mut rx) = mpsc::channel(64);
    let outcome = engine
        .run(
            &Utterance::new("what did we decide about the vendor contract?"),
            &Conversation::new(),
            Some(&tx),
            &CancellationToken::new(),
        )
        .await
        .expect("turn should succeed");
    drop(tx);

    assert_eq!(outcome.answer.as_deref(), Some("You decided to renew it for two years [0]."));
    assert_eq!(outcome.citations.len(), 1);
    assert_eq!(outcome.citations[0].title, "Vendor contract review");
    assert_eq!(outcome.citations[0].url.as_deref(), Some("https://drive.example.com/f2"));

    let mut types = Vec::new();
    while let Some(event) = rx.recv().await {
        types.push(event.event_type());
    }
    assert_eq!(types, vec!["routed", "tool_call", "tool_result", "answer_delta", "done"]);
}

#[tokio::test]
async fn e2e_attached_document_is_fetched_first() {
    let provider = Arc::new(ScriptedProvider::new(vec![answer(
        "Q3 spend grows 12%, mostly hiring [0].",
        "answered",
        &[],
    )]));
    let engine = engine(provider.clone(), InMemorySearchBackend::with_records(corpus()));
    let utterance = Utterance::new("summarize this").with_attachment(Attachment::SearchPill {
        doc_id: "f1".into(),
        title: "Q3 Budget".into(),
        app: Some(App::Drive),
        entity: Some(Entity::File),
    });

    let (tx, mut rx) = mpsc::channel(64);
    let outcome = engine
        .run(&utterance, &Conversation::new(), Some(&tx), &CancellationToken::new())
        .await
        .expect("turn should succeed");
    drop(tx);

    assert_eq!(outcome.termination, Termination::Answered);
    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.state.focused_ids, vec!["f1"]);
    assert_eq!(outcome.citations[0].id, "f1");

    let mut sources = Vec::new();
    while let Some(event) = rx.recv().await {
        if let LoopEvent::ToolCall { name, source, .. } = event {
            sources.push((name, source));
        }
    }
    assert_eq!(sources, vec![("fetch_documents".to_string(), PlanSource::PreSelection)]);
}

// ── E2E: Failure paths ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_restricted_records_stay_hidden_and_turn_exhausts() {
    let backend = InMemorySearchBackend::with_records(corpus());
    backend
        .insert(file("f9", "Salary bands", "Band 4 ranges from ..."))
        .await;
    backend.restrict("f9", vec!["hr@example.com".to_string()]).await;

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![make_tool_call("search", serde_json::json!({"query": "salary bands"}))]),
        text_response(r#"{"reasoning": "Nothing you can access mentions salary bands."}"#),
    ]));
    let engine = engine(provider.clone(), backend).with_config(LoopConfig {
        model: "mock".into(),
        max_iterations: 1,
        ..LoopConfig::default()
    });

    let outcome = engine
        .run(&Utterance::new("salary bands"), &Conversation::new(), None, &CancellationToken::new())
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert!(outcome.state.records.is_empty());
    let failure = outcome.failure.expect("exhausted turns explain themselves");
    assert_eq!(failure.reasoning, "Nothing you can access mentions salary bands.");
    assert_eq!(failure.tool_calls, 1);
    assert_eq!(failure.failed_calls, 0);
}

// ── E2E: Clarification ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ambiguous_question_is_clarified_and_resumed() {
    let backend = InMemorySearchBackend::with_records(vec![
        file("b25", "Budget 2025", "Flat budget."),
        file("b26", "Budget 2026", "Budget grows 4%."),
    ]);
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![make_tool_call("search", serde_json::json!({"query": "budget"}))]),
        answer("", "ambiguous", &[0, 1]),
        answer("The 2026 budget grows 4% [1].", "answered", &[]),
    ]));
    let engine = engine(provider.clone(), backend);
    let conversation = Conversation::new();

    let suspended = engine
        .run(&Utterance::new("how much does the budget grow"), &conversation, None, &CancellationToken::new())
        .await
        .expect("turn should succeed");
    assert_eq!(suspended.termination, Termination::Clarifying);
    let options = &suspended.clarification().expect("options offered").options;
    assert_eq!(options.len(), 2);
    assert_eq!(options[1].id, "b26");

    // Suspended state survives a serialization round trip
    let json = serde_json::to_string(&suspended.state).unwrap();
    let state = serde_json::from_str(&json).unwrap();

    let outcome = engine
        .resume(state, 1, &conversation, None, &CancellationToken::new())
        .await
        .expect("resume should succeed");
    assert_eq!(outcome.termination, Termination::Answered);
    assert_eq!(outcome.citations[0].title, "Budget 2026");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn e2e_cancelled_turn_reports_cancellation() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let engine = engine(provider.clone(), InMemorySearchBackend::with_records(corpus()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (tx, mut rx) = mpsc::channel(8);
    let outcome = engine
        .run(&Utterance::new("current emails"), &Conversation::new(), Some(&tx), &cancel)
        .await
        .expect("cancellation is not an error");
    drop(tx);

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert_eq!(provider.calls(), 0);
    match rx.recv().await {
        Some(LoopEvent::Done { termination, .. }) => assert_eq!(termination, Termination::Cancelled),
        other => panic!("unexpected event: {other:?}"),
    }
}
