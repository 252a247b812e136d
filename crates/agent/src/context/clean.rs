//! Excerpt cleanup before text reaches a prompt.

use regex::Regex;
use std::sync::OnceLock;

/// Longest run of one punctuation character kept as-is.
const MAX_PUNCT_RUN: usize = 3;

fn highlight_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</?(?:hi|b|em|mark)>").unwrap())
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").unwrap())
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" *\n[ \n]*").unwrap())
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{FFFD}')
        || c.is_control() && c != '\n' && c != '\t'
}

/// Strip highlight markup, invisible and control characters, runs of
/// repeated punctuation and redundant whitespace.
pub fn clean_text(text: &str) -> String {
    let text = highlight_re().replace_all(text, "");
    let text = text.replace("\r\n", "\n");

    let mut out = String::with_capacity(text.len());
    let mut run_char = None;
    let mut run_len = 0;
    for c in text.chars().filter(|c| !is_invisible(*c)) {
        if c.is_ascii_punctuation() && run_char == Some(c) {
            run_len += 1;
            if run_len > MAX_PUNCT_RUN {
                continue;
            }
        } else {
            run_char = Some(c);
            run_len = 1;
        }
        out.push(c);
    }

    let out = spaces_re().replace_all(&out, " ");
    let out = blank_lines_re().replace_all(&out, |caps: &regex::Captures<'_>| {
        if caps[0].matches('\n').count() > 1 { "\n\n" } else { "\n" }
    });
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_highlights() {
        assert_eq!(clean_text("the <hi>Q3</hi> <b>budget</b>"), "the Q3 budget");
    }

    #[test]
    fn collapses_punctuation_runs() {
        assert_eq!(clean_text("wait.......... what?!?!"), "wait... what?!?!");
        assert_eq!(clean_text("==========\nHeader"), "===\nHeader");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_text("  a \t  b\n\n\n\nc \n d  "), "a b\n\nc\nd");
    }

    #[test]
    fn removes_control_and_invisible_characters() {
        assert_eq!(clean_text("a\u{0}b\u{200B}c\u{FFFD}d\u{7}"), "abcd");
    }

    #[test]
    fn idempotent() {
        let once = clean_text("<hi>x</hi>!!!!!   y\n\n\n\nz\u{1}");
        assert_eq!(clean_text(&once), once);
    }
}
