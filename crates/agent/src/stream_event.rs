//! Loop progress events.
//!
//! `LoopEvent` is what the tool-selection loop reports while a turn runs,
//! so a front end can show routing, tool activity and the answer as it
//! streams in.

use serde::{Deserialize, Serialize};
use sift_core::query::Route;

use crate::tool_loop::{ClarificationOption, PlanSource, Termination};

/// Events emitted by the loop during a turn.
///
/// - `routed`: the router's decision
/// - `tool_call`: a retrieval tool is being invoked
/// - `tool_result`: the invocation finished (or failed)
/// - `thought`: a planning or synthesis note
/// - `answer_delta`: newly available answer text
/// - `clarification`: the turn is suspended pending a choice
/// - `done`: the turn terminated
/// - `error`: the turn failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Routed { route: Route },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
        source: PlanSource,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
        records: usize,
    },

    Thought { content: String },

    /// Appended text; concatenating every delta yields the answer.
    AnswerDelta { content: String },

    Clarification {
        question: String,
        options: Vec<ClarificationOption>,
    },

    Done {
        termination: Termination,
        iterations: usize,
        tool_calls_made: usize,
    },

    Error { message: String },
}

impl LoopEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Routed { .. } => "routed",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Thought { .. } => "thought",
            Self::AnswerDelta { .. } => "answer_delta",
            Self::Clarification { .. } => "clarification",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_answer_delta() {
        let event = LoopEvent::AnswerDelta {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"answer_delta""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = LoopEvent::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            input: serde_json::json!({"query": "budget"}),
            source: PlanSource::Model,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""source":"model""#));
    }

    #[test]
    fn event_serialization_routed() {
        let event = LoopEvent::Routed {
            route: Route::Conversational,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"routed""#));
        assert!(json.contains(r#""route":"conversational""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = LoopEvent::Done {
            termination: Termination::Exhausted,
            iterations: 3,
            tool_calls_made: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""termination":"exhausted""#));
        assert!(json.contains(r#""iterations":3"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(LoopEvent::Thought { content: "x".into() }.event_type(), "thought");
        assert_eq!(LoopEvent::Error { message: "x".into() }.event_type(), "error");
        assert_eq!(
            LoopEvent::Clarification {
                question: "Which one?".into(),
                options: vec![]
            }
            .event_type(),
            "clarification"
        );
        assert_eq!(
            LoopEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: "c".into(),
                success: true,
                records: 0
            }
            .event_type(),
            "tool_result"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"answer_delta","content":"hi"}"#;
        let event: LoopEvent = serde_json::from_str(json).unwrap();
        match event {
            LoopEvent::AnswerDelta { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
