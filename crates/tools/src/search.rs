//! Search tool: ranked keyword/semantic search over the index.
//!
//! The safe default tool: it only needs a query, so the tool-selection loop
//! falls back to it whenever a plan is unusable.

use async_trait::async_trait;
use sift_core::error::ToolError;
use sift_core::search::{SearchBackend, SearchRequest};
use sift_core::tool::{Tool, ToolContext, ToolResult};
use std::sync::Arc;
use tracing::debug;

use crate::args;

pub struct SearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl SearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search mail, calendar, files, people, chat and connected data sources by keywords. \
         Returns records ranked by relevance. Use when the question names a topic."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = args::filter_properties();
        properties.insert(
            "query".into(),
            serde_json::json!({
                "type": "string",
                "description": "Keywords to search for"
            }),
        );
        properties.insert(
            "limit".into(),
            serde_json::json!({
                "type": "integer",
                "description": "Maximum number of results (default 10)",
                "default": 10
            }),
        );
        properties.insert(
            "alpha".into(),
            serde_json::json!({
                "type": "number",
                "description": "0.0 = keyword match only, 1.0 = semantic only (default 0.5)"
            }),
        );
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = args::required_str(&arguments, "query")?;

        let request = SearchRequest::new(query, &ctx.principal)
            .with_scope(args::app(&arguments), args::entity(&arguments))
            .with_options(args::search_options(&arguments, ctx, "limit"));

        debug!(backend = self.backend.name(), query, "search tool");

        let records = self
            .backend
            .search(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::found(String::new(), records))
    }
}
