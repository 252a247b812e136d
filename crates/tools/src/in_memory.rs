//! In-memory search backend: useful for testing, demos and the CLI.
//!
//! Scores records by keyword overlap blended with their stored relevance, and
//! applies the same filters a hosted index would: scope, time range,
//! participants, exclusions, paging and time sorting.

use async_trait::async_trait;
use sift_core::error::SearchError;
use sift_core::query::Participants;
use sift_core::record::RetrievedRecord;
use sift_core::search::{SearchBackend, SearchRequest};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A search backend over records held in a Vec.
#[derive(Debug)]
pub struct InMemorySearchBackend {
    records: Arc<RwLock<Vec<RetrievedRecord>>>,
    /// Record id → principals allowed to see it. Ids without an entry are public.
    acl: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl InMemorySearchBackend {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            acl: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_records(records: Vec<RetrievedRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
            acl: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a record, replacing any with the same id.
    pub async fn insert(&self, record: RetrievedRecord) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Restrict a record to the given principals.
    pub async fn restrict(&self, id: impl Into<String>, principals: impl IntoIterator<Item = String>) {
        self.acl
            .write()
            .await
            .entry(id.into())
            .or_default()
            .extend(principals);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemorySearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '@' && c != '.')
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| t.len() > 1)
        .collect()
}

/// Fraction of query terms found in `text`.
fn term_coverage(query_terms: &[String], text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = query_terms.iter().filter(|t| lower.contains(t.as_str())).count();
    hits as f32 / query_terms.len() as f32
}

fn keyword_score(query_terms: &[String], record: &RetrievedRecord) -> f32 {
    let title = term_coverage(query_terms, record.title());
    let people = term_coverage(query_terms, &record.people().join(" "));
    let body = record
        .chunks()
        .iter()
        .map(|c| term_coverage(query_terms, &c.text))
        .fold(0.0_f32, f32::max);
    (title * 2.0 + people + body).min(3.0) / 3.0
}

/// Every named participant must appear somewhere on the record.
fn matches_participants(filter: &Participants, record: &RetrievedRecord) -> bool {
    if filter.is_empty() {
        return true;
    }
    let people = record.people().join(" ").to_lowercase();
    filter.all().all(|p| people.contains(&p.to_lowercase()))
}

fn compare_by_time(a: &RetrievedRecord, b: &RetrievedRecord, descending: bool) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        // Undated records sort last either way
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<RetrievedRecord>, SearchError> {
        if request.options.limit == 0 {
            return Err(SearchError::InvalidRequest("limit must be > 0".into()));
        }

        let records = self.records.read().await;
        let acl = self.acl.read().await;
        let query_terms = terms(&request.query);
        let opts = &request.options;

        let mut scored: Vec<(f32, RetrievedRecord)> = records
            .iter()
            .filter(|r| is_visible(&acl, r.id(), &request.principal))
            .filter(|r| request.app.is_none_or(|app| r.app() == app))
            .filter(|r| request.entity.is_none_or(|entity| r.entity() == entity))
            .filter(|r| !opts.excluded_ids.iter().any(|id| id == r.id()))
            .filter(|r| {
                opts.time_range
                    .is_none_or(|range| r.timestamp().is_some_and(|t| range.contains(t)))
            })
            .filter(|r| matches_participants(&opts.participants, r))
            .filter_map(|r| {
                let keyword = keyword_score(&query_terms, r);
                if !query_terms.is_empty() && keyword == 0.0 {
                    return None;
                }
                let score = if query_terms.is_empty() {
                    r.relevance()
                } else {
                    (1.0 - opts.alpha) * keyword + opts.alpha * r.relevance()
                };

                let mut hit = r.clone();
                hit.set_relevance(score);
                if !query_terms.is_empty()
                    && let Some(chunks) = hit.chunks_mut()
                {
                    for chunk in chunks.iter_mut() {
                        chunk.score = term_coverage(&query_terms, &chunk.text);
                    }
                }
                Some((score, hit))
            })
            .collect();

        // Stable sorts keep insertion order among ties
        match opts.sort {
            Some(direction) => {
                let descending = direction == sift_core::query::SortDirection::Desc;
                scored.sort_by(|(_, a), (_, b)| compare_by_time(a, b, descending));
            }
            None => scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(Ordering::Equal)),
        }

        let results: Vec<RetrievedRecord> = scored
            .into_iter()
            .skip(opts.offset)
            .take(opts.limit)
            .map(|(_, r)| r)
            .collect();

        debug!(
            query = %request.query,
            app = ?request.app,
            entity = ?request.entity,
            hits = results.len(),
            "In-memory search"
        );

        Ok(results)
    }

    async fn get_by_ids(
        &self,
        ids: &[String],
        principal: &str,
    ) -> Result<Vec<RetrievedRecord>, SearchError> {
        let records = self.records.read().await;
        let acl = self.acl.read().await;

        // Keep the caller's id order; ids may also be urls
        let found = ids
            .iter()
            .filter_map(|id| {
                records
                    .iter()
                    .find(|r| r.id() == id || r.url() == Some(id.as_str()))
            })
            .filter(|r| is_visible(&acl, r.id(), principal))
            .fold(Vec::<RetrievedRecord>::new(), |mut acc, r| {
                if !acc.iter().any(|seen| seen.id() == r.id()) {
                    acc.push(r.clone());
                }
                acc
            });

        Ok(found)
    }
}

fn is_visible(acl: &HashMap<String, HashSet<String>>, id: &str, principal: &str) -> bool {
    acl.get(id).is_none_or(|allowed| allowed.contains(principal))
}
