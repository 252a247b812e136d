//! Query classification types.
//!
//! A [`QueryClassification`] is what a router makes of one utterance: an
//! intent tag plus the structured filters the retrieval tools understand.
//! Every field serializes even when unset (as `null` or an empty array) so
//! consumers can branch on the shape without probing for keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application (data source) a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum App {
    #[serde(alias = "gmail", alias = "email")]
    Mail,
    #[serde(alias = "google-calendar", alias = "google_calendar")]
    Calendar,
    #[serde(alias = "googledrive", alias = "google_drive", alias = "google-drive")]
    Drive,
    #[serde(alias = "google-workspace", alias = "contacts")]
    Directory,
    #[serde(alias = "slack")]
    Chat,
    #[serde(alias = "data-source", alias = "datasource")]
    DataSource,
}

impl App {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Calendar => "calendar",
            Self::Drive => "drive",
            Self::Directory => "directory",
            Self::Chat => "chat",
            Self::DataSource => "data_source",
        }
    }
}

impl std::fmt::Display for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of item within an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    #[serde(alias = "mail", alias = "email")]
    Message,
    Event,
    #[serde(alias = "document", alias = "doc")]
    File,
    #[serde(alias = "contact", alias = "user")]
    Person,
    #[serde(alias = "mail_attachment")]
    Attachment,
    Channel,
    DataSourceFile,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Event => "event",
            Self::File => "file",
            Self::Person => "person",
            Self::Attachment => "attachment",
            Self::Channel => "channel",
            Self::DataSourceFile => "data_source_file",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of retrieval an utterance asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Open search across everything; no trustworthy app/entity scope.
    SearchWithoutFilters,
    /// Search scoped to one app/entity, narrowed by residue or participants.
    SearchWithFilters,
    /// Metadata listing of one app/entity (e.g. "my latest emails").
    GetItems,
}

impl Intent {
    /// Derive the intent from extracted filters.
    ///
    /// One app and one entity are required for anything but an open search.
    /// With them, free-text residue or named participants make it a filtered
    /// search; without, it is a plain listing.
    pub fn from_filters(filters: &QueryFilters) -> Self {
        if filters.apps.len() != 1 || filters.entities.len() != 1 {
            return Self::SearchWithoutFilters;
        }
        let has_residue = filters
            .filter_query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());
        if has_residue || !filters.participants.is_empty() {
            Self::SearchWithFilters
        } else {
            Self::GetItems
        }
    }
}

/// Calendar direction relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalDirection {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Named participants, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl Participants {
    pub fn is_empty(&self) -> bool {
        self.from.is_empty() && self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }

    /// Every participant regardless of role, in from/to/cc/bcc order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.from.iter().chain(&self.to).chain(&self.cc).chain(&self.bcc)
    }
}

/// Inclusive time bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| at >= s) && self.end.is_none_or(|e| at <= e)
    }
}

/// Structured filters extracted from an utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub apps: Vec<App>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
    /// Free-text residue left after structural keywords are stripped.
    #[serde(default)]
    pub filter_query: Option<String>,
    #[serde(default)]
    pub participants: Participants,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

impl QueryFilters {
    /// The single app, when exactly one was extracted.
    pub fn single_app(&self) -> Option<App> {
        match self.apps.as_slice() {
            [app] => Some(*app),
            _ => None,
        }
    }

    /// The single entity, when exactly one was extracted.
    pub fn single_entity(&self) -> Option<Entity> {
        match self.entities.as_slice() {
            [entity] => Some(*entity),
            _ => None,
        }
    }
}

/// A router's reading of one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClassification {
    #[serde(rename = "type")]
    pub intent: Intent,
    /// Disambiguated query; `None` when nothing needed resolving.
    #[serde(default)]
    pub rewritten_query: Option<String>,
    #[serde(default)]
    pub is_follow_up: bool,
    /// Only ever set for calendar event queries.
    #[serde(default)]
    pub temporal_direction: Option<TemporalDirection>,
    #[serde(default)]
    pub filters: QueryFilters,
}

impl QueryClassification {
    /// Build a classification whose intent is derived from `filters`.
    pub fn from_filters(filters: QueryFilters) -> Self {
        Self {
            intent: Intent::from_filters(&filters),
            rewritten_query: None,
            is_follow_up: false,
            temporal_direction: None,
            filters,
        }
    }

    /// Open search with no filters at all.
    pub fn unfiltered() -> Self {
        Self::from_filters(QueryFilters::default())
    }

    /// The text retrieval should search for: the rewrite when there is one,
    /// otherwise `original`.
    pub fn effective_query<'a>(&'a self, original: &'a str) -> &'a str {
        self.rewritten_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(original)
    }
}

/// Where an utterance should go next.
///
/// Exactly one of a direct answer or a retrieval instruction is carried,
/// except for small talk, which needs neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route", content = "value", rename_all = "snake_case")]
pub enum Route {
    DirectAnswer(String),
    Retrieve(QueryClassification),
    Conversational,
}

impl Route {
    pub fn classification(&self) -> Option<&QueryClassification> {
        match self {
            Self::Retrieve(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(apps: Vec<App>, entities: Vec<Entity>) -> QueryFilters {
        QueryFilters {
            apps,
            entities,
            ..Default::default()
        }
    }

    #[test]
    fn intent_without_single_scope_is_open_search() {
        assert_eq!(
            Intent::from_filters(&QueryFilters::default()),
            Intent::SearchWithoutFilters
        );
        let mut f = filters(vec![App::Mail, App::Drive], vec![Entity::Message]);
        f.filter_query = Some("budget".into());
        assert_eq!(Intent::from_filters(&f), Intent::SearchWithoutFilters);
    }

    #[test]
    fn intent_single_scope_without_detail_is_listing() {
        let f = filters(vec![App::Mail], vec![Entity::Message]);
        assert_eq!(Intent::from_filters(&f), Intent::GetItems);

        let mut counted = f.clone();
        counted.count = Some(5);
        counted.sort_direction = Some(SortDirection::Desc);
        assert_eq!(Intent::from_filters(&counted), Intent::GetItems);
    }

    #[test]
    fn intent_single_scope_with_detail_is_filtered_search() {
        let mut f = filters(vec![App::Calendar], vec![Entity::Event]);
        f.filter_query = Some("finance team".into());
        assert_eq!(Intent::from_filters(&f), Intent::SearchWithFilters);

        let mut p = filters(vec![App::Mail], vec![Entity::Message]);
        p.participants.from.push("Alice Chen".into());
        assert_eq!(Intent::from_filters(&p), Intent::SearchWithFilters);
    }

    #[test]
    fn classification_serializes_every_field() {
        let c = QueryClassification::unfiltered();
        let json = serde_json::to_value(&c).unwrap();
        for key in ["type", "rewritten_query", "is_follow_up", "temporal_direction", "filters"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        for key in [
            "apps",
            "entities",
            "sort_direction",
            "filter_query",
            "participants",
            "count",
            "offset",
            "time_range",
        ] {
            assert!(json["filters"].get(key).is_some(), "missing filters.{key}");
        }
        assert!(json["temporal_direction"].is_null());
        assert_eq!(json["type"], "SearchWithoutFilters");
    }

    #[test]
    fn app_aliases_deserialize() {
        let app: App = serde_json::from_str("\"gmail\"").unwrap();
        assert_eq!(app, App::Mail);
        let entity: Entity = serde_json::from_str("\"mail\"").unwrap();
        assert_eq!(entity, Entity::Message);
    }

    #[test]
    fn time_range_open_bounds() {
        let now = Utc::now();
        let range = TimeRange { start: Some(now), end: None };
        assert!(range.contains(now));
        assert!(!range.contains(now - chrono::Duration::seconds(1)));
        assert!(TimeRange::default().contains(now));
    }

    #[test]
    fn effective_query_prefers_rewrite() {
        let mut c = QueryClassification::unfiltered();
        assert_eq!(c.effective_query("what about it"), "what about it");
        c.rewritten_query = Some("what about Q3 Budget".into());
        assert_eq!(c.effective_query("what about it"), "what about Q3 Budget");
    }
}
