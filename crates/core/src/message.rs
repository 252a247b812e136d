//! Message, Utterance and Conversation domain types.
//!
//! These are the value objects that flow through a turn:
//! the caller hands in an [`Utterance`] plus the [`Conversation`] so far, the
//! orchestrator reads both and never mutates the conversation itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::{App, Entity};

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// A structured reference the user attached to a turn.
///
/// Attachments are the "obvious structured evidence" the tool-selection loop
/// dereferences before asking the model anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    /// A result pill the user picked from an earlier search.
    SearchPill {
        doc_id: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app: Option<App>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity: Option<Entity>,
    },
    /// A pasted link to an indexed document.
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc_id: Option<String>,
    },
}

impl Attachment {
    /// The identifier a dereferencing tool can look up.
    pub fn reference(&self) -> &str {
        match self {
            Self::SearchPill { doc_id, .. } => doc_id,
            Self::Link { doc_id: Some(id), .. } => id,
            Self::Link { url, .. } => url,
        }
    }
}

/// The raw user input for one turn. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// References of all attachments, in attachment order.
    pub fn references(&self) -> Vec<String> {
        self.attachments
            .iter()
            .map(|a| a.reference().to_string())
            .collect()
    }
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// The assistant turn immediately preceding the next user turn.
    ///
    /// Returns `None` when the last message is not an assistant message, so
    /// references never resolve against older answers.
    pub fn preceding_assistant_turn(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role != Role::System)
            .filter(|m| m.role == Role::Assistant)
    }

    /// User and assistant turns only, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.messages.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn preceding_assistant_turn_only_when_last() {
        let mut conv = Conversation::new();
        conv.push(Message::user("find the budget doc"));
        conv.push(Message::assistant("I found \"Q3 Budget\"."));
        assert!(conv.preceding_assistant_turn().is_some());

        conv.push(Message::user("thanks"));
        assert!(conv.preceding_assistant_turn().is_none());
    }

    #[test]
    fn attachment_reference_prefers_doc_id() {
        let pill = Attachment::SearchPill {
            doc_id: "doc-1".into(),
            title: "Roadmap".into(),
            app: None,
            entity: None,
        };
        assert_eq!(pill.reference(), "doc-1");

        let link = Attachment::Link {
            url: "https://drive.example.com/d/42".into(),
            doc_id: None,
        };
        assert_eq!(link.reference(), "https://drive.example.com/d/42");
    }

    #[test]
    fn utterance_attachment_serialization() {
        let utterance = Utterance::new("summarize this").with_attachment(Attachment::Link {
            url: "https://x".into(),
            doc_id: Some("d1".into()),
        });
        let json = serde_json::to_string(&utterance).unwrap();
        assert!(json.contains(r#""type":"link""#));
        let back: Utterance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.references(), vec!["d1".to_string()]);
    }
}
