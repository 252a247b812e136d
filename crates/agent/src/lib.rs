//! The Sift orchestration engine.
//!
//! One conversational turn flows through four stages:
//!
//! 1. **Route** the utterance: answer directly, chat, or retrieve
//! 2. **Select a tool** per iteration, from pre-selection strategies or the model
//! 3. **Assemble context** from gathered records into citation-indexed sections
//! 4. **Synthesize** a grounded answer, ask for clarification, or explain the failure
//!
//! Model replies are read through the lenient [`JsonAssembler`], so streamed
//! and slightly malformed structured output never stops a turn.

pub mod context;
pub mod fallback;
pub mod json;
pub mod prompts;
pub mod router;
pub mod stream_event;
pub mod tool_loop;
pub mod trace;

#[cfg(test)]
mod test_helpers;

pub use context::{
    AssembledContext, AssemblyOptions, Citation, CitationTable, ContextAssembler, ContextFragment,
    SectionOrder,
};
pub use fallback::{FailureExplanation, FallbackReasoner};
pub use json::{JsonAssembler, JsonAssemblyError};
pub use router::{ModelRouter, QueryRouter, RuleRouter};
pub use stream_event::LoopEvent;
pub use tool_loop::{
    Clarification, ClarificationOption, LinkedEvidenceStrategy, LoopConfig, LoopOutcome, LoopState,
    MetadataListingStrategy, PlanSource, PreSelectionStrategy, Termination, ToolInvocationPlan,
    ToolSelectionLoop,
};
pub use trace::{CallStatus, ReasoningTrace, ToolCallRecord};
