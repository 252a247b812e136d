//! Incremental JSON assembly for streamed model output.
//!
//! Models asked for structured output emit it a few tokens at a time, often
//! wrapped in code fences, prefixed with prose, or cut off mid-value. The
//! [`JsonAssembler`] takes the buffer received so far and returns the best
//! object it can recover, or [`JsonAssemblyError::ParseIncomplete`] when
//! nothing usable has arrived yet. Feeding it a growing buffer yields a
//! growing object: a field appears once its value is complete and is never
//! retracted.
//!
//! Repairs run as an ordered pipeline of named passes (see [`passes`]):
//!
//! 1. `strip_code_fence`
//! 2. `drop_stray_closers`
//! 3. `trim_to_object_span`
//! 4. `wrap_prose` (only with an expected key)
//! 5. lenient parse, retried after `escape_newlines_in_strings`
//! 6. `strip_noise` and one last parse

mod lenient;
pub mod passes;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

/// Errors from JSON assembly.
#[derive(Debug, thiserror::Error)]
pub enum JsonAssemblyError {
    /// No usable structure yet; retry with more input.
    #[error("JSON output is incomplete")]
    ParseIncomplete,

    /// An object was recovered but does not fit the requested type.
    #[error("JSON output does not match the expected shape: {0}")]
    Mismatch(String),
}

/// Best-effort parser for a growing model buffer.
#[derive(Debug, Clone, Default)]
pub struct JsonAssembler {
    expected_key: Option<String>,
    allow_partial_strings: bool,
}

impl JsonAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat plain prose as the value of `key` instead of failing.
    pub fn with_expected_key(mut self, key: impl Into<String>) -> Self {
        self.expected_key = Some(key.into());
        self
    }

    /// Keep an unterminated trailing string instead of withholding it.
    ///
    /// Used to stream a growing answer; the field's value may then change
    /// between calls.
    pub fn allow_partial_strings(mut self) -> Self {
        self.allow_partial_strings = true;
        self
    }

    /// Assemble the buffer received so far into an object.
    pub fn assemble(&self, buffer: &str) -> Result<Map<String, Value>, JsonAssemblyError> {
        let text = passes::strip_code_fence(buffer);
        let text = passes::drop_stray_closers(&text);
        let text = passes::trim_to_object_span(&text);
        if text.trim().is_empty() {
            return Err(JsonAssemblyError::ParseIncomplete);
        }
        let text = match &self.expected_key {
            Some(key) => passes::wrap_prose(&text, key).unwrap_or(text),
            None => text,
        };

        if let Some(map) = self.parse(&text) {
            return Ok(map);
        }

        let cleaned = passes::strip_noise(&text);
        if cleaned != text
            && let Some(map) = self.parse(&cleaned)
        {
            trace!("JSON recovered after noise stripping");
            return Ok(map);
        }

        Err(JsonAssemblyError::ParseIncomplete)
    }

    /// Assemble and deserialize into `T`.
    pub fn assemble_as<T: DeserializeOwned>(&self, buffer: &str) -> Result<T, JsonAssemblyError> {
        let map = self.assemble(buffer)?;
        serde_json::from_value(Value::Object(map))
            .map_err(|e| JsonAssemblyError::Mismatch(e.to_string()))
    }

    fn parse(&self, text: &str) -> Option<Map<String, Value>> {
        let mut map = lenient::parse_object(text, self.allow_partial_strings);
        if map.as_ref().is_none_or(Map::is_empty) && text.trim().len() > 2 {
            let escaped = passes::escape_newlines_in_strings(text);
            if let Some(retry) = lenient::parse_object(&escaped, self.allow_partial_strings)
                && !retry.is_empty()
            {
                map = Some(retry);
            }
        }
        match map {
            Some(map) if !map.is_empty() => Some(map),
            // `{}` only counts when the model really closed an empty object.
            Some(map) if serde_json::from_str::<Map<String, Value>>(text.trim()).is_ok() => Some(map),
            _ => None,
        }
    }
}
