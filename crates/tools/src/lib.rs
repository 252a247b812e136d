//! Retrieval tool implementations for Sift.
//!
//! Tools give the tool-selection loop its ways of gathering evidence:
//! ranked search, metadata listing, and dereferencing ids. All of them talk
//! to a `SearchBackend`; `InMemorySearchBackend` is the local one.

mod args;
pub mod fetch_documents;
pub mod get_items;
pub mod in_memory;
pub mod search;

use sift_core::search::SearchBackend;
use sift_core::tool::ToolRegistry;
use std::sync::Arc;

pub use fetch_documents::FetchDocumentsTool;
pub use get_items::GetItemsTool;
pub use in_memory::InMemorySearchBackend;
pub use search::SearchTool;

/// Create a tool registry with every retrieval tool over `backend`.
pub fn default_registry(backend: Arc<dyn SearchBackend>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchTool::new(backend.clone())));
    registry.register(Box::new(GetItemsTool::new(backend.clone())));
    registry.register(Box::new(FetchDocumentsTool::new(backend)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_retrieval_tools() {
        let registry = default_registry(Arc::new(InMemorySearchBackend::new()));
        assert_eq!(registry.names(), vec!["fetch_documents", "get_items", "search"]);
    }
}
