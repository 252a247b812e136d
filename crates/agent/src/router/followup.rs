//! Follow-up detection and reference resolution.
//!
//! An utterance is a follow-up only when it carries an explicit referential
//! marker (pronoun, demonstrative, ordinal, back-reference) that resolves
//! against the assistant turn immediately before it. Shared topic words are
//! not enough.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use super::lexicon::{self, Token};

const PRONOUNS: &[&str] = &["it", "them", "they", "he", "she", "him", "her"];
const POSSESSIVES: &[&str] = &["its", "their", "his"];
const BACK_REFERENCES: &[&str] = &["above", "aforementioned", "mentioned", "same"];
const REFERENT_NOUNS: &[&str] = &[
    "one", "ones", "item", "items", "result", "results", "option", "entry", "link", "thread",
    "topic", "project", "list",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    /// Replace `span` with the first entity of the previous answer.
    Reference { span: Range<usize>, possessive: bool },
    /// Replace `span` with the n-th list item of the previous answer.
    Ordinal { span: Range<usize>, item: ItemIndex },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemIndex {
    Nth(usize),
    Last,
}

fn is_time_noun(token: Option<&Token<'_>>) -> bool {
    token.is_some_and(|t| lexicon::TIME_NOUNS.contains(&t.lower.trim_end_matches('s')))
}

fn is_referent(token: Option<&Token<'_>>) -> bool {
    token.is_some_and(|t| {
        REFERENT_NOUNS.contains(&t.lower.as_str()) || lexicon::scope_term(&t.lower).is_some()
    })
}

/// Ordinals point at one item: "the second one", "the first email".
fn is_item_referent(token: Option<&Token<'_>>) -> bool {
    token.is_some_and(|t| {
        REFERENT_NOUNS.contains(&t.lower.as_str())
            || lexicon::scope_term(&t.lower).is_some() && !t.lower.ends_with('s')
    })
}

fn find_marker(tokens: &[Token<'_>]) -> Option<Marker> {
    for (i, token) in tokens.iter().enumerate() {
        let word = token.lower.as_str();
        let next = tokens.get(i + 1);

        // "the second one", "the last item", "the 3rd"
        if word == "the" && let Some(ord) = next {
            let item = match ord.lower.as_str() {
                "last" => Some(ItemIndex::Last),
                w => lexicon::ordinal(w).map(ItemIndex::Nth),
            };
            if let Some(item) = item {
                let after = tokens.get(i + 2);
                let ends_here = after.is_none();
                if ends_here || is_item_referent(after) {
                    let end = if ends_here { ord.span.end } else { tokens[i + 2].span.end };
                    return Some(Marker::Ordinal {
                        span: token.span.start..end,
                        item,
                    });
                }
            }
        }

        if PRONOUNS.contains(&word) || BACK_REFERENCES.contains(&word) {
            return Some(Marker::Reference {
                span: token.span.clone(),
                possessive: false,
            });
        }
        if POSSESSIVES.contains(&word) {
            return Some(Marker::Reference {
                span: token.span.clone(),
                possessive: true,
            });
        }

        let counts = match word {
            "these" | "those" => !is_time_noun(next),
            "this" | "that" => !is_time_noun(next) && (next.is_none() || is_referent(next)),
            _ => false,
        };
        if counts {
            return Some(Marker::Reference {
                span: token.span.clone(),
                possessive: false,
            });
        }
    }
    None
}

/// Whether `tokens` contain an explicit referential marker at all.
pub(crate) fn has_marker(tokens: &[Token<'_>]) -> bool {
    find_marker(tokens).is_some()
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+(.+)$").unwrap())
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"\n]{2,80})"|“([^”\n]{2,80})”"#).unwrap())
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n]{2,80})\*\*").unwrap())
}

fn title_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\p{Lu}[\p{L}\p{N}&'-]*(?:[ \t]+(?:of[ \t]+)?\p{Lu}[\p{L}\p{N}&'-]*)+").unwrap()
    })
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\d+\]").unwrap())
}

/// List items of an answer, cleaned down to their label.
fn list_items(answer: &str) -> Vec<String> {
    list_item_re()
        .captures_iter(answer)
        .filter_map(|c| {
            let line = citation_re().replace_all(&c[1], "").replace("**", "");
            let label = [" - ", " — ", ": "]
                .iter()
                .filter_map(|sep| line.find(sep))
                .min()
                .map_or(line.as_str(), |cut| &line[..cut]);
            let label = label.trim();
            (!label.is_empty()).then(|| label.to_string())
        })
        .collect()
}

/// The entity an unqualified reference most likely points at.
fn primary_entity(answer: &str) -> Option<String> {
    if let Some(c) = quoted_re().captures(answer) {
        return c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().trim().to_string());
    }
    if let Some(c) = bold_re().captures(answer) {
        return Some(c[1].trim().to_string());
    }
    if let Some(item) = list_items(answer).into_iter().next() {
        return Some(item);
    }
    title_case_re().find_iter(answer).find_map(|m| {
        let phrase = m.as_str().trim_start_matches("The ").trim();
        (phrase.contains(' ')).then(|| phrase.to_string())
    })
}

/// Resolve the utterance's reference against the previous assistant answer.
///
/// Returns the rewritten query, or `None` when there is no marker or it
/// cannot be resolved.
pub(crate) fn resolve(text: &str, tokens: &[Token<'_>], previous_answer: Option<&str>) -> Option<String> {
    let answer = previous_answer?;
    let (span, replacement) = match find_marker(tokens)? {
        Marker::Reference { span, possessive } => {
            let entity = primary_entity(answer)?;
            let replacement = if possessive { format!("{entity}'s") } else { entity };
            (span, replacement)
        }
        Marker::Ordinal { span, item } => {
            let items = list_items(answer);
            let chosen = match item {
                ItemIndex::Nth(n) => items.get(n),
                ItemIndex::Last => items.last(),
            }?;
            (span, chosen.clone())
        }
    };
    Some(format!("{}{}{}", &text[..span.start], replacement, &text[span.end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::lexicon::tokenize;

    fn rewrite(text: &str, answer: &str) -> Option<String> {
        resolve(text, &tokenize(text), Some(answer))
    }

    const LISTED: &str = "I found three files:\n\
        1. **Q3 Budget Review** - shared by Ana [0]\n\
        2. Hiring Plan: draft [1]\n\
        3. Offsite Agenda [2]";

    #[test]
    fn ordinal_resolves_against_list() {
        assert_eq!(rewrite("open the second one", LISTED).as_deref(), Some("open Hiring Plan"));
        assert_eq!(rewrite("summarize the last one", LISTED).as_deref(), Some("summarize Offsite Agenda"));
        assert_eq!(rewrite("what about the 5th one", LISTED), None);
    }

    #[test]
    fn pronoun_resolves_to_first_entity() {
        assert_eq!(
            rewrite("who owns it?", LISTED).as_deref(),
            Some("who owns Q3 Budget Review?")
        );
        assert_eq!(
            rewrite("when is its deadline", "The \"Vendor Renewal\" is pending.").as_deref(),
            Some("when is Vendor Renewal's deadline")
        );
    }

    #[test]
    fn title_case_entity_fallback() {
        assert_eq!(
            rewrite("summarize that", "You met with Acme Corp on Monday.").as_deref(),
            Some("summarize Acme Corp")
        );
    }

    #[test]
    fn time_demonstratives_are_not_markers() {
        assert!(!has_marker(&tokenize("meetings this week")));
        assert!(!has_marker(&tokenize("what did I send that month")));
        assert!(has_marker(&tokenize("forward those emails")));
    }

    #[test]
    fn plural_ordinal_is_a_sort_not_a_reference() {
        assert!(!has_marker(&tokenize("show the first emails from Ana")));
        assert!(has_marker(&tokenize("open the first email")));
    }

    #[test]
    fn relative_that_is_not_a_marker() {
        assert!(!has_marker(&tokenize("emails that mention the budget")));
    }

    #[test]
    fn no_previous_answer_means_no_follow_up() {
        let tokens = tokenize("summarize it");
        assert_eq!(resolve("summarize it", &tokens, None), None);
    }

    #[test]
    fn topical_overlap_alone_is_not_follow_up() {
        assert_eq!(rewrite("more about the Q3 budget", LISTED), None);
    }
}
