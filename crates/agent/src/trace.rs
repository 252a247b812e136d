//! Reasoning trace and tool-call log for a single turn.
//!
//! The tool-selection loop records what it thought, which tool it called and
//! what came back. The trace is:
//!
//! - **Turn-scoped**: owned by one loop run, returned in its state snapshot
//! - **Serializable**: suspended turns carry it across a clarification
//! - **Renderable**: fed to the fallback reasoner when retrieval fails

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Data Structures ───────────────────────────────────────────────────────

/// The kind of reasoning trace entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Thought,
    Action,
    Observation,
}

/// A single entry in the reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// How a tool invocation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// One entry of the tool-call log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: usize,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub status: CallStatus,
    /// Records returned, before de-duplication
    pub records: usize,
    /// Records not seen earlier in the turn
    pub new_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.status == CallStatus::Succeeded
    }
}

/// Everything the loop did during one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub entries: Vec<TraceEntry>,
    pub tool_calls: Vec<ToolCallRecord>,
}

// ── Implementation ────────────────────────────────────────────────────────

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thought(&mut self, thought: &str) {
        self.push(TraceKind::Thought, thought);
    }

    pub fn add_action(&mut self, action: &str) {
        self.push(TraceKind::Action, action);
    }

    pub fn add_observation(&mut self, observation: &str) {
        self.push(TraceKind::Observation, observation);
    }

    fn push(&mut self, kind: TraceKind, content: &str) {
        self.entries.push(TraceEntry {
            kind,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn record_call(&mut self, call: ToolCallRecord) {
        self.tool_calls.push(call);
    }

    pub fn failed_calls(&self) -> usize {
        self.tool_calls.iter().filter(|c| !c.succeeded()).count()
    }

    /// Whether an identical call was already made this turn.
    pub fn already_called(&self, tool: &str, arguments: &serde_json::Value) -> bool {
        self.tool_calls
            .iter()
            .any(|c| c.tool == tool && &c.arguments == arguments)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.tool_calls.is_empty()
    }

    // ── Rendering ──

    /// Render as a text section for a prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.entries.is_empty() {
            out.push_str("## Reasoning Trace\n");
            for entry in &self.entries {
                let label = match entry.kind {
                    TraceKind::Thought => "Thought",
                    TraceKind::Action => "Action",
                    TraceKind::Observation => "Observation",
                };
                out.push_str(&format!("[{}] {}\n", label, entry.content));
            }
            out.push('\n');
        }

        if !self.tool_calls.is_empty() {
            out.push_str("## Tool Calls\n");
            for call in &self.tool_calls {
                out.push_str(&format!("- {}\n", call_line(call)));
            }
            out.push('\n');
        }

        out
    }

    /// One-line summary per call, in call order.
    pub fn summarize_calls(&self) -> Vec<String> {
        self.tool_calls.iter().map(call_line).collect()
    }
}

fn call_line(call: &ToolCallRecord) -> String {
    match call.status {
        CallStatus::Succeeded => format!(
            "{}({}) returned {} records ({} new)",
            call.tool, call.arguments, call.records, call.new_records
        ),
        CallStatus::Failed => format!(
            "{}({}) failed: {}",
            call.tool,
            call.arguments,
            call.error.as_deref().unwrap_or("unknown error")
        ),
        CallStatus::TimedOut => format!("{}({}) timed out", call.tool, call.arguments),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
