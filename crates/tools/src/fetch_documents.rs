//! Fetch-documents tool: dereferences record ids or links.
//!
//! The fixed dereferencing tool: when a turn carries attachments, the
//! tool-selection loop plans this directly instead of asking the model.

use async_trait::async_trait;
use sift_core::error::ToolError;
use sift_core::search::SearchBackend;
use sift_core::tool::{Tool, ToolContext, ToolResult};
use std::sync::Arc;
use tracing::debug;

use crate::args;

/// Upper bound on ids per call.
const MAX_IDS: usize = 20;

pub struct FetchDocumentsTool {
    backend: Arc<dyn SearchBackend>,
}

impl FetchDocumentsTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FetchDocumentsTool {
    fn name(&self) -> &str {
        "fetch_documents"
    }

    fn description(&self) -> &str {
        "Fetch full records by id or link. Use when the user attached or referenced specific items."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Record ids or links to fetch"
                }
            },
            "required": ["ids"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let mut ids = args::string_list(&arguments, "ids");
        if ids.is_empty() {
            return Err(ToolError::InvalidArguments("Missing 'ids' argument".into()));
        }
        ids.truncate(MAX_IDS);

        debug!(count = ids.len(), "fetch_documents tool");

        let records = self
            .backend
            .get_by_ids(&ids, &ctx.principal)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::found(String::new(), records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemorySearchBackend;
    use serde_json::json;
    use sift_core::record::{PersonRecord, RetrievedRecord};

    fn tool() -> FetchDocumentsTool {
        let person = RetrievedRecord::Person(PersonRecord {
            id: "p1".into(),
            name: "Dana Ruiz".into(),
            email: Some("dana@example.com".into()),
            job_title: None,
            department: None,
            phone: None,
            relevance: 0.0,
        });
        FetchDocumentsTool::new(Arc::new(InMemorySearchBackend::with_records(vec![person])))
    }

    #[tokio::test]
    async fn fetches_by_id() {
        let result = tool()
            .execute(json!({"ids": ["p1", "nope"]}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].title(), "Dana Ruiz");
    }

    #[tokio::test]
    async fn single_id_string_is_accepted() {
        let result = tool()
            .execute(json!({"ids": "p1"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn empty_ids_rejected() {
        let err = tool()
            .execute(json!({"ids": []}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
