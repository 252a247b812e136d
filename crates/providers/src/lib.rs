//! Model gateway implementations for Sift.
//!
//! All backends implement the `sift_core::Provider` trait.
//! The registry builds them from configuration once, at startup.

pub mod fallback;
pub mod openai_compat;
pub mod registry;

pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ProviderRegistry, build_from_config};
