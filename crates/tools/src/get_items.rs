//! Get-items tool: structured metadata listing of one app/entity.
//!
//! Answers "my latest emails" or "meetings next week" where there may be no
//! keywords at all, only scope, time bounds, participants and ordering.

use async_trait::async_trait;
use sift_core::error::ToolError;
use sift_core::search::{SearchBackend, SearchRequest};
use sift_core::tool::{Tool, ToolContext, ToolResult};
use std::sync::Arc;
use tracing::debug;

use crate::args;

pub struct GetItemsTool {
    backend: Arc<dyn SearchBackend>,
}

impl GetItemsTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for GetItemsTool {
    fn name(&self) -> &str {
        "get_items"
    }

    fn description(&self) -> &str {
        "List items of one application and kind (e.g. mail messages, calendar events), \
         optionally filtered by participants, time range and keywords, ordered by time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = args::filter_properties();
        properties.insert(
            "filter_query".into(),
            serde_json::json!({
                "type": "string",
                "description": "Optional keywords to narrow the listing"
            }),
        );
        properties.insert(
            "count".into(),
            serde_json::json!({
                "type": "integer",
                "description": "Number of items to return (default 10)",
                "default": 10
            }),
        );
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": ["app", "entity"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let app = args::app(&arguments)
            .ok_or_else(|| ToolError::InvalidArguments("Missing or unknown 'app' argument".into()))?;
        let entity = args::entity(&arguments).ok_or_else(|| {
            ToolError::InvalidArguments("Missing or unknown 'entity' argument".into())
        })?;
        let filter_query = args::optional_str(&arguments, "filter_query").unwrap_or_default();

        let mut options = args::search_options(&arguments, ctx, "count");
        if options.sort.is_none() && filter_query.is_empty() {
            // A bare listing reads newest first
            options.sort = Some(sift_core::query::SortDirection::Desc);
        }

        debug!(%app, %entity, filter_query, "get_items tool");

        let request = SearchRequest::new(filter_query, &ctx.principal)
            .with_scope(Some(app), Some(entity))
            .with_options(options);

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemorySearchBackend;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use sift_core::record::{MailRecord, RetrievedRecord};

    fn mail(id: &str, day: u32) -> RetrievedRecord {
        RetrievedRecord::Mail(MailRecord {
            id: id.into(),
            subject: format!("Status {day}"),
            thread_id: None,
            from: Some("dana@example.com".into()),
            to: vec![],
            cc: vec![],
            bcc: vec![],
            labels: vec![],
            timestamp: Some(Utc.with_ymd_and_hms(2026, 4, day, 8, 0, 0).unwrap()),
            relevance: 0.0,
            chunks: vec![],
        })
    }

    fn tool() -> GetItemsTool {
        GetItemsTool::new(Arc::new(InMemorySearchBackend::with_records(vec![
            mail("a", 1),
            mail("b", 3),
            mail("c", 2),
        ])))
    }

    #[tokio::test]
    async fn bare_listing_is_newest_first() {
        let result = tool()
            .execute(json!({"app": "mail", "entity": "message"}), &ToolContext::new("ana@example.com"))
            .await
            .unwrap();
        let ids: Vec<&str> = result.records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn explicit_sort_and_count() {
        let result = tool()
            .execute(
                json!({"app": "mail", "entity": "message", "sort": "asc", "count": 1}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id(), "a");
    }

    #[tokio::test]
    async fn scope_is_required() {
        let err = tool()
            .execute(json!({"app": "mail"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(msg) if msg.contains("entity")));
    }
}
