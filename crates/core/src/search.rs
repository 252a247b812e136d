//! SearchBackend trait: the hosted search index, seen from the orchestrator.
//!
//! The orchestrator never looks inside the index's ranking. It asks for
//! records and consumes the returned list in the order given.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::query::{App, Entity, Participants, SortDirection, TimeRange};
use crate::record::RetrievedRecord;

/// Paging, weighting and filtering options for one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Blend between keyword (0.0) and semantic (1.0) relevance
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub excluded_ids: Vec<String>,
    #[serde(default)]
    pub participants: Participants,
    /// Order by timestamp instead of relevance
    #[serde(default)]
    pub sort: Option<SortDirection>,
}

fn default_limit() -> usize {
    10
}

fn default_alpha() -> f32 {
    0.5
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            alpha: default_alpha(),
            time_range: None,
            excluded_ids: Vec::new(),
            participants: Participants::default(),
            sort: None,
        }
    }
}

/// A search call against the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free text; empty for pure metadata listings
    pub query: String,
    /// Identity results are scoped to
    pub principal: String,
    #[serde(default)]
    pub app: Option<App>,
    #[serde(default)]
    pub entity: Option<Entity>,
    #[serde(default)]
    pub options: SearchOptions,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            principal: principal.into(),
            app: None,
            entity: None,
            options: SearchOptions::default(),
        }
    }

    pub fn with_scope(mut self, app: Option<App>, entity: Option<Entity>) -> Self {
        self.app = app;
        self.entity = entity;
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

/// The search collaborator.
///
/// Implementations wrap a hosted index; `InMemorySearchBackend` in
/// `sift-tools` is the local one used by tests and the CLI.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Ranked search. The returned order is the ranking.
    async fn search(
        &self,
        request: SearchRequest,
    ) -> std::result::Result<Vec<RetrievedRecord>, SearchError>;

    /// Fetch records by id (or url), skipping ids the principal cannot see.
    async fn get_by_ids(
        &self,
        ids: &[String],
        principal: &str,
    ) -> std::result::Result<Vec<RetrievedRecord>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_options_defaults() {
        let opts = SearchOptions::default();
        assert_eq!(opts.limit, 10);
        assert_eq!(opts.offset, 0);
        assert!((opts.alpha - 0.5).abs() < f32::EPSILON);
        assert!(opts.sort.is_none());
    }

    #[test]
    fn search_request_deserializes_with_defaults() {
        let req: SearchRequest = serde_json::from_value(serde_json::json!({
            "query": "budget",
            "principal": "ana@example.com",
            "app": "drive"
        }))
        .unwrap();
        assert_eq!(req.app, Some(App::Drive));
        assert_eq!(req.options.limit, 10);
    }
}
