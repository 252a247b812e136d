//! Query routing: what should happen with an utterance?
//!
//! A router reads one utterance in the context of the conversation and
//! returns a [`Route`]: answer directly, reply conversationally, or retrieve
//! with a [`QueryClassification`] (intent plus structured filters).
//!
//! - [`RuleRouter`]: deterministic word tables, no model call
//! - [`ModelRouter`]: structured model output, normalized through the same
//!   invariants and falling back to the rules when unparseable
//!
//! [`QueryClassification`]: sift_core::query::QueryClassification

mod followup;
mod lexicon;
pub mod model;
mod participants;
pub mod rule;
mod time;

use async_trait::async_trait;
use sift_core::message::{Conversation, Utterance};
use sift_core::query::Route;

pub use model::ModelRouter;
pub use rule::RuleRouter;

/// Decides where an utterance goes next.
#[async_trait]
pub trait QueryRouter: Send + Sync {
    fn name(&self) -> &str;

    /// Route one utterance. Only gateway failures are errors.
    async fn route(&self, utterance: &Utterance, conversation: &Conversation) -> sift_core::Result<Route>;
}
