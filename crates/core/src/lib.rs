//! # Sift Core
//!
//! Domain types, traits, and error definitions for the Sift retrieval
//! orchestrator. This crate has **no framework dependencies**: it defines the
//! domain model that the provider, tool, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here:
//! - [`Provider`]: the model gateway (one-shot and streamed responses)
//! - [`SearchBackend`]: the search index the retrieval tools query
//! - [`Tool`]: a retrieval capability the tool-selection loop can invoke
//!
//! Implementations live in their respective crates, so the orchestration core
//! can be exercised with scripted mocks.

pub mod error;
pub mod message;
pub mod provider;
pub mod query;
pub mod record;
pub mod search;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Attachment, Conversation, ConversationId, Message, MessageToolCall, Role, Utterance};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use query::{
    App, Entity, Intent, Participants, QueryClassification, QueryFilters, Route, SortDirection,
    TemporalDirection, TimeRange,
};
pub use record::{RetrievedRecord, ScoredChunk};
pub use search::{SearchBackend, SearchOptions, SearchRequest};
pub use tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
