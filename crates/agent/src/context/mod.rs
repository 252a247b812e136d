//! Evidence rendering for prompts.
//!
//! Retrieved records of every kind are projected into numbered sections with
//! a parallel citation table, so a model answer citing `[n]` can be traced
//! back to the record at input position `n`.

pub mod assembler;
pub mod clean;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyOptions, Citation, CitationTable, ContextAssembler, ContextFragment,
    SectionOrder,
};
pub use clean::clean_text;
pub use token::{estimate_messages_tokens, estimate_tokens, estimate_tools_tokens};
