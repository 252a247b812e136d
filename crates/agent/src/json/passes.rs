//! Normalization passes run over a model buffer before parsing.
//!
//! Each pass is a pure `&str -> String` transform. [`JsonAssembler`] runs
//! them in a fixed order; they are exposed individually so each repair can
//! be tested on its own.
//!
//! [`JsonAssembler`]: super::JsonAssembler

use regex::Regex;
use std::sync::OnceLock;

fn bare_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^"[^"\n]*"\s*:"#).unwrap())
}

/// Strip a fenced code-block wrapper, including an unterminated trailing fence.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // The language tag runs to the first newline; nothing follows it yet.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None if rest.trim_start().starts_with('{') => rest,
        None => return String::new(),
    };
    body.trim_end().trim_end_matches('`').trim().to_string()
}

/// Remove closing braces/brackets that have no opener, then re-wrap a bare
/// `"key": value` remainder in braces (the `null}` tail artifact).
///
/// Only structured text is touched: prose such as `see [1]]` is returned as is.
pub fn drop_stray_closers(text: &str) -> String {
    let start = text.trim_start();
    if !(start.starts_with(['{', '[']) || bare_pair().is_match(start)) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                depth += 1;
                out.push(c);
            }
            '}' | ']' if depth == 0 => {}
            '}' | ']' => {
                depth -= 1;
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    let trimmed = out.trim();
    if !trimmed.contains('{') && bare_pair().is_match(trimmed) {
        return format!("{{{trimmed}}}");
    }
    out
}

/// Byte offset of the `}` that closes the `{` at `start`, if it has arrived.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// A `{` opens an object when a key, a close or the end of input follows.
fn opens_object(rest: &str) -> bool {
    rest.trim_start()
        .chars()
        .next()
        .is_none_or(|c| c == '"' || c == '}')
}

/// Trim leading prose before the first object and trailing content after it.
///
/// Text whose first brace does not open an object is left alone, so prose
/// mentioning braces still reaches [`wrap_prose`].
pub fn trim_to_object_span(text: &str) -> String {
    let Some(start) = text.find('{') else {
        return text.to_string();
    };
    if start > 0 && !opens_object(&text[start + 1..]) {
        return text.to_string();
    }
    match matching_close(text, start) {
        Some(end) => text[start..=end].to_string(),
        None => text[start..].to_string(),
    }
}

/// Wrap plain prose as the string value of `key`.
///
/// Returns `None` when the text already looks like an object.
pub fn wrap_prose(text: &str, key: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return None;
    }
    let key = serde_json::Value::String(key.to_string());
    let value = serde_json::Value::String(trimmed.to_string());
    Some(format!("{{{key}: {value}}}"))
}

/// Escape raw newlines, carriage returns and tabs inside string literals.
pub fn escape_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Last-resort cleanup: drop every fence marker and `//` comment line,
/// cut trailing content after the object and collapse newlines.
pub fn strip_noise(text: &str) -> String {
    let joined = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .map(|line| line.replace("```json", "").replace("```", ""))
        .collect::<Vec<_>>()
        .join(" ");
    trim_to_object_span(joined.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_is_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n``"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1"), "{\"a\": 1");
        assert_eq!(strip_code_fence("```jso"), "");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn stray_closer_tail_is_rewrapped() {
        assert_eq!(drop_stray_closers("\"answer\": null}"), "{\"answer\": null}");
        assert_eq!(drop_stray_closers("{\"a\": \"}\"}"), "{\"a\": \"}\"}");
        assert_eq!(drop_stray_closers("{\"a\": 1}}]"), "{\"a\": 1}");
    }

    #[test]
    fn prose_closers_are_kept() {
        assert_eq!(drop_stray_closers("done]"), "done]");
        assert_eq!(drop_stray_closers("see [1]] and {2}}"), "see [1]] and {2}}");
    }

    #[test]
    fn span_trimming() {
        assert_eq!(trim_to_object_span("Sure! {\"a\": 1} hope this helps"), "{\"a\": 1}");
        assert_eq!(trim_to_object_span("Here: {\"a\": {\"b\": 1}, \"c\""), "{\"a\": {\"b\": 1}, \"c\"");
        assert_eq!(trim_to_object_span("use {braces} freely"), "use {braces} freely");
        assert_eq!(trim_to_object_span("no braces"), "no braces");
    }

    #[test]
    fn prose_wrapping_escapes() {
        assert_eq!(
            wrap_prose("He said \"hi\"\nthen left \\o/", "answer").unwrap(),
            r#"{"answer": "He said \"hi\"\nthen left \\o/"}"#
        );
        assert_eq!(wrap_prose("{\"a\": 1}", "answer"), None);
    }

    #[test]
    fn newline_escaping_only_inside_strings() {
        assert_eq!(
            escape_newlines_in_strings("{\n\"a\": \"x\ny\"\n}"),
            "{\n\"a\": \"x\\ny\"\n}"
        );
    }

    #[test]
    fn noise_stripping() {
        let noisy = "```json\n{\n// the answer\n\"a\": 1\n}\n``` trailing";
        assert_eq!(strip_noise(noisy), "{ \"a\": 1 }");
    }
}
