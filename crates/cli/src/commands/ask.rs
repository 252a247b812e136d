//! `sift ask`: answer questions over a local records file.

use serde::Deserialize;
use sift_agent::{LoopConfig, LoopEvent, LoopOutcome, Termination, ToolSelectionLoop};
use sift_config::AppConfig;
use sift_core::message::{Conversation, Message, Utterance};
use sift_core::record::RetrievedRecord;
use sift_tools::{InMemorySearchBackend, default_registry};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::CliResult;

type Input = Lines<BufReader<Stdin>>;

/// A records file: a bare array, or records plus per-record access lists.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsFile {
    Plain(Vec<RetrievedRecord>),
    Indexed {
        records: Vec<RetrievedRecord>,
        /// Record id → principals allowed to see it
        #[serde(default)]
        acl: HashMap<String, Vec<String>>,
    },
}

/// Build a search backend from a records file.
pub async fn load_backend(path: &Path) -> CliResult<InMemorySearchBackend> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read records from {}: {e}", path.display()))?;
    let file: RecordsFile = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse records in {}: {e}", path.display()))?;

    let (records, acl) = match file {
        RecordsFile::Plain(records) => (records, HashMap::new()),
        RecordsFile::Indexed { records, acl } => (records, acl),
    };
    let backend = InMemorySearchBackend::with_records(records);
    for (id, principals) in acl {
        backend.restrict(id, principals).await;
    }
    info!(path = %path.display(), records = backend.len().await, "Loaded records");
    Ok(backend)
}

pub async fn run(
    config: &AppConfig,
    question: Option<String>,
    records: &Path,
    principal: Option<String>,
    json_events: bool,
) -> CliResult {
    let backend = load_backend(records).await?;
    let provider = super::gateway(config)?;
    let router = super::router(config, Some(provider.clone()));
    let principal = principal.or_else(|| config.principal.clone()).unwrap_or_default();

    let engine = ToolSelectionLoop::new(provider, Arc::new(default_registry(Arc::new(backend))), router)
        .with_config(LoopConfig::from_app_config(config))
        .with_principal(principal);

    let mut session = Session {
        engine,
        conversation: Conversation::new(),
        json_events,
        input: BufReader::new(tokio::io::stdin()).lines(),
    };

    match question {
        Some(question) => session.ask(&question).await,
        None => session.interactive(config).await,
    }
}

struct Session {
    engine: ToolSelectionLoop,
    conversation: Conversation,
    json_events: bool,
    input: Input,
}

impl Session {
    async fn interactive(&mut self, config: &AppConfig) -> CliResult {
        println!();
        println!("  Sift — interactive mode");
        println!();
        println!("  Provider:  {}", config.default_provider);
        println!("  Model:     {}", config.default_model);
        println!("  Router:    {}", if config.orchestrator.model_router { "model" } else { "rules" });
        println!();
        println!("  Type a question and press Enter. Ctrl+C cancels a running turn.");
        println!("  Type 'exit' to quit.");
        println!();

        loop {
            prompt("  You > ")?;
            let Some(line) = self.input.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            if let Err(e) = self.ask(line).await {
                eprintln!("  [Error] {e}");
            }
            println!();
        }
        Ok(())
    }

    /// Run one turn, following clarifications until it ends.
    async fn ask(&mut self, question: &str) -> CliResult {
        let utterance = Utterance::new(question);
        let (engine, conversation) = (&self.engine, &self.conversation);
        let mut outcome = with_events(self.json_events, |tx, cancel| async move {
            engine.run(&utterance, conversation, Some(&tx), &cancel).await
        })
        .await?;

        while outcome.termination == Termination::Clarifying {
            let Some(choice) = self.choose(&outcome).await? else {
                println!("  (no choice made)");
                return Ok(());
            };
            let state = outcome.state;
            let (engine, conversation) = (&self.engine, &self.conversation);
            outcome = with_events(self.json_events, |tx, cancel| async move {
                engine.resume(state, choice, conversation, Some(&tx), &cancel).await
            })
            .await?;
        }

        self.report(&outcome);
        if let Some(answer) = &outcome.answer {
            self.conversation.push(Message::user(question));
            self.conversation.push(Message::assistant(answer));
        }
        Ok(())
    }

    /// Ask the user to pick a clarification option. `None` on EOF or a blank line.
    async fn choose(&mut self, outcome: &LoopOutcome) -> CliResult<Option<usize>> {
        let Some(clarification) = outcome.clarification() else {
            return Ok(None);
        };
        if !self.json_events {
            println!();
            println!("  {}", clarification.question);
            for (i, option) in clarification.options.iter().enumerate() {
                println!("    {}. {}", i + 1, option.label);
            }
        }

        loop {
            prompt("  Choice > ")?;
            let Some(line) = self.input.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                return Ok(None);
            }
            match line.parse::<usize>() {
                Ok(n) if (1..=clarification.options.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => eprintln!("  Pick a number between 1 and {}", clarification.options.len()),
            }
        }
    }

    fn report(&self, outcome: &LoopOutcome) {
        if self.json_events {
            if let Ok(json) = serde_json::to_string(&outcome_summary(outcome)) {
                println!("{json}");
            }
            return;
        }
        match outcome.termination {
            Termination::Answered => {
                println!();
                if !outcome.citations.is_empty() {
                    println!();
                    println!("  Sources:");
                    for citation in &outcome.citations {
                        match &citation.url {
                            Some(url) => println!("    [{}] {} — {url}", citation.index, citation.title),
                            None => println!("    [{}] {}", citation.index, citation.title),
                        }
                    }
                }
            }
            Termination::Exhausted => {
                if let Some(failure) = &outcome.failure {
                    println!("  {}", failure.reasoning);
                }
            }
            Termination::Cancelled => println!("  (cancelled)"),
            Termination::Clarifying => {}
        }
    }
}

/// Run `step` with an event printer attached and Ctrl+C wired to cancel.
async fn with_events<F, Fut>(json: bool, step: F) -> sift_core::Result<LoopOutcome>
where
    F: FnOnce(mpsc::Sender<LoopEvent>, CancellationToken) -> Fut,
    Fut: Future<Output = sift_core::Result<LoopOutcome>>,
{
    let (tx, mut rx) = mpsc::channel::<LoopEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = step(tx, cancel).await;
    watcher.abort();
    let _ = printer.await;
    result
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}

fn print_event(event: &LoopEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        LoopEvent::ToolCall { name, input, .. } => eprintln!("  → {name} {input}"),
        LoopEvent::ToolResult { output, success, .. } => {
            let mark = if *success { "✓" } else { "✗" };
            eprintln!("    {mark} {output}");
        }
        LoopEvent::AnswerDelta { content } => {
            print!("{content}");
            let _ = std::io::stdout().flush();
        }
        LoopEvent::Error { message } => eprintln!("  [Error] {message}"),
        LoopEvent::Routed { .. } | LoopEvent::Thought { .. } | LoopEvent::Clarification { .. } | LoopEvent::Done { .. } => {
            tracing::debug!(event = event.event_type(), "Loop event");
        }
    }
}

fn outcome_summary(outcome: &LoopOutcome) -> serde_json::Value {
    serde_json::json!({
        "type": "outcome",
        "termination": outcome.termination,
        "answer": outcome.answer,
        "citations": outcome.citations,
        "failure": outcome.failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_plain_record_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"[{"kind": "file", "id": "f1", "title": "Q3 Budget", "relevance": 0.9}]"#,
        )
        .unwrap();
        let backend = load_backend(&path).await.unwrap();
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn loads_records_with_acl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"{
                "records": [
                    {"kind": "file", "id": "f1", "title": "Q3 Budget"},
                    {"kind": "mail", "id": "m1", "subject": "Offsite"}
                ],
                "acl": {"f1": ["ana@example.com"]}
            }"#,
        )
        .unwrap();
        let backend = load_backend(&path).await.unwrap();
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn malformed_records_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, r#"{"records": 3}"#).unwrap();
        let err = load_backend(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse records"));
    }
}
