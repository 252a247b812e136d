//! Argument decoding shared by the retrieval tools.
//!
//! Models produce loosely-typed JSON. Unknown enum values and malformed
//! optional fields are dropped rather than failing the call; only a missing
//! required argument is an error.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sift_core::error::ToolError;
use sift_core::query::{App, Entity, Participants, SortDirection, TimeRange};
use sift_core::search::SearchOptions;
use sift_core::tool::ToolContext;

/// A required, non-empty string argument.
pub(crate) fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// An optional string argument, empty strings read as absent.
pub(crate) fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// A list of strings. A bare string counts as a one-element list.
pub(crate) fn string_list(arguments: &Value, key: &str) -> Vec<String> {
    match &arguments[key] {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn lenient<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

pub(crate) fn app(arguments: &Value) -> Option<App> {
    lenient(&arguments["app"])
}

pub(crate) fn entity(arguments: &Value) -> Option<Entity> {
    lenient(&arguments["entity"])
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `start`/`end` RFC 3339 bounds, either side optional.
pub(crate) fn time_range(arguments: &Value) -> Option<TimeRange> {
    let range = TimeRange {
        start: timestamp(&arguments["start"]),
        end: timestamp(&arguments["end"]),
    };
    (range.start.is_some() || range.end.is_some()).then_some(range)
}

pub(crate) fn participants(arguments: &Value) -> Participants {
    Participants {
        from: string_list(arguments, "from"),
        to: string_list(arguments, "to"),
        cc: string_list(arguments, "cc"),
        bcc: string_list(arguments, "bcc"),
    }
}

/// Search options from arguments, with the turn's exclusions merged in.
pub(crate) fn search_options(arguments: &Value, ctx: &ToolContext, limit_key: &str) -> SearchOptions {
    let defaults = SearchOptions::default();

    let mut excluded_ids = ctx.excluded_ids.clone();
    for id in string_list(arguments, "excluded_ids") {
        if !excluded_ids.contains(&id) {
            excluded_ids.push(id);
        }
    }

    SearchOptions {
        limit: arguments[limit_key]
            .as_u64()
            .map(|n| (n as usize).clamp(1, 100))
            .unwrap_or(ctx.default_limit),
        offset: arguments["offset"].as_u64().unwrap_or(0) as usize,
        alpha: arguments["alpha"]
            .as_f64()
            .map(|a| (a as f32).clamp(0.0, 1.0))
            .unwrap_or(defaults.alpha),
        time_range: time_range(arguments),
        excluded_ids,
        participants: participants(arguments),
        sort: lenient::<SortDirection>(&arguments["sort"]),
    }
}

/// Schema properties shared by the search-style tools.
pub(crate) fn filter_properties() -> serde_json::Map<String, Value> {
    let value = serde_json::json!({
        "app": {
            "type": "string",
            "enum": ["mail", "calendar", "drive", "directory", "chat", "data_source"],
            "description": "Restrict to one application"
        },
        "entity": {
            "type": "string",
            "enum": ["message", "event", "file", "person", "attachment", "channel", "data_source_file"],
            "description": "Restrict to one kind of item"
        },
        "from": { "type": "array", "items": { "type": "string" }, "description": "Senders or organizers" },
        "to": { "type": "array", "items": { "type": "string" }, "description": "Recipients or attendees" },
        "cc": { "type": "array", "items": { "type": "string" } },
        "bcc": { "type": "array", "items": { "type": "string" } },
        "start": { "type": "string", "description": "Earliest timestamp (RFC 3339)" },
        "end": { "type": "string", "description": "Latest timestamp (RFC 3339)" },
        "sort": { "type": "string", "enum": ["asc", "desc"], "description": "Order by time instead of relevance" },
        "offset": { "type": "integer", "description": "Results to skip", "default": 0 },
        "excluded_ids": { "type": "array", "items": { "type": "string" }, "description": "Ids already seen" }
    });
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
