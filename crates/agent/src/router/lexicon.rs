//! Fixed word tables and tokenization for rule-based routing.

use regex::Regex;
use sift_core::query::{App, Entity, SortDirection, TemporalDirection};
use std::ops::Range;
use std::sync::OnceLock;

/// One word of an utterance with its byte span in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub raw: &'a str,
    pub lower: String,
    pub span: Range<usize>,
}

impl Token<'_> {
    pub fn is_title_case(&self) -> bool {
        let mut chars = self.raw.chars();
        chars.next().is_some_and(char::is_uppercase) && chars.any(char::is_lowercase)
            || self.raw.len() > 1 && self.raw.chars().all(|c| c.is_ascii_uppercase())
    }

    pub fn is_email(&self) -> bool {
        let Some((local, domain)) = self.raw.split_once('@') else {
            return false;
        };
        !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
    }

    pub fn number(&self) -> Option<u32> {
        if let Ok(n) = self.lower.parse() {
            return Some(n);
        }
        NUMBER_WORDS
            .iter()
            .position(|w| *w == self.lower)
            .map(|i| i as u32 + 1)
    }
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}@#_'.+-]+").unwrap())
}

/// Split `text` into words, dropping surrounding punctuation.
pub(crate) fn tokenize(text: &str) -> Vec<Token<'_>> {
    word_re()
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str().trim_matches(|c: char| matches!(c, '.' | '\'' | '-' | '+'));
            if raw.is_empty() {
                return None;
            }
            let start = m.start() + m.as_str().find(raw).unwrap_or(0);
            Some(Token {
                raw,
                lower: raw.to_lowercase(),
                span: start..start + raw.len(),
            })
        })
        .collect()
}

/// Words naming an app and entity, e.g. "emails" → mail messages.
pub(crate) const SCOPE_TERMS: &[(&str, App, Entity)] = &[
    ("email", App::Mail, Entity::Message),
    ("emails", App::Mail, Entity::Message),
    ("mail", App::Mail, Entity::Message),
    ("mails", App::Mail, Entity::Message),
    ("inbox", App::Mail, Entity::Message),
    ("gmail", App::Mail, Entity::Message),
    ("message", App::Mail, Entity::Message),
    ("messages", App::Mail, Entity::Message),
    ("meeting", App::Calendar, Entity::Event),
    ("meetings", App::Calendar, Entity::Event),
    ("event", App::Calendar, Entity::Event),
    ("events", App::Calendar, Entity::Event),
    ("calendar", App::Calendar, Entity::Event),
    ("appointment", App::Calendar, Entity::Event),
    ("appointments", App::Calendar, Entity::Event),
    ("call", App::Calendar, Entity::Event),
    ("calls", App::Calendar, Entity::Event),
    ("file", App::Drive, Entity::File),
    ("files", App::Drive, Entity::File),
    ("doc", App::Drive, Entity::File),
    ("docs", App::Drive, Entity::File),
    ("document", App::Drive, Entity::File),
    ("documents", App::Drive, Entity::File),
    ("spreadsheet", App::Drive, Entity::File),
    ("spreadsheets", App::Drive, Entity::File),
    ("slides", App::Drive, Entity::File),
    ("drive", App::Drive, Entity::File),
    ("contact", App::Directory, Entity::Person),
    ("contacts", App::Directory, Entity::Person),
    ("people", App::Directory, Entity::Person),
    ("person", App::Directory, Entity::Person),
    ("colleague", App::Directory, Entity::Person),
    ("colleagues", App::Directory, Entity::Person),
    ("directory", App::Directory, Entity::Person),
    ("attachment", App::Mail, Entity::Attachment),
    ("attachments", App::Mail, Entity::Attachment),
    ("channel", App::Chat, Entity::Channel),
    ("channels", App::Chat, Entity::Channel),
    ("slack", App::Chat, Entity::Channel),
];

pub(crate) fn scope_term(word: &str) -> Option<(App, Entity)> {
    SCOPE_TERMS
        .iter()
        .find(|(term, _, _)| *term == word)
        .map(|(_, app, entity)| (*app, *entity))
}

pub(crate) fn sort_word(word: &str) -> Option<SortDirection> {
    match word {
        "latest" | "recent" | "newest" | "last" => Some(SortDirection::Desc),
        "oldest" | "earliest" | "first" => Some(SortDirection::Asc),
        _ => None,
    }
}

pub(crate) fn temporal_word(word: &str) -> Option<TemporalDirection> {
    match word {
        "next" | "upcoming" | "future" | "coming" => Some(TemporalDirection::Next),
        "last" | "previous" | "past" | "oldest" | "earliest" | "latest" | "recent" => {
            Some(TemporalDirection::Prev)
        }
        _ => None,
    }
}

/// Role cues preceding participants. Two-word cues are matched first.
pub(crate) const ROLE_CUES: &[(&[&str], ParticipantRole)] = &[
    (&["sent", "by"], ParticipantRole::From),
    (&["sent", "to"], ParticipantRole::To),
    (&["from"], ParticipantRole::From),
    (&["to"], ParticipantRole::To),
    (&["cc"], ParticipantRole::Cc),
    (&["cc'd"], ParticipantRole::Cc),
    (&["bcc"], ParticipantRole::Bcc),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParticipantRole {
    From,
    To,
    Cc,
    Bcc,
}

const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

pub(crate) const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

pub(crate) fn ordinal(word: &str) -> Option<usize> {
    if let Some(i) = ORDINALS.iter().position(|o| *o == word) {
        return Some(i);
    }
    let digits = word
        .strip_suffix("st")
        .or_else(|| word.strip_suffix("nd"))
        .or_else(|| word.strip_suffix("rd"))
        .or_else(|| word.strip_suffix("th"))?;
    digits.parse::<usize>().ok().filter(|n| *n > 0).map(|n| n - 1)
}

/// Nouns after which a demonstrative refers to time, not to an earlier answer.
pub(crate) const TIME_NOUNS: &[&str] = &[
    "week", "weekend", "month", "year", "quarter", "day", "morning", "afternoon", "evening",
    "night", "time", "hour",
];

pub(crate) const WEEKDAYS_AND_MONTHS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "january",
    "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "today", "tomorrow", "yesterday",
];

/// Words carrying no search content: actions, time, quantity, connectors.
const GENERIC_WORDS: &[&str] = &[
    // actions
    "show", "find", "get", "list", "give", "search", "look", "fetch", "pull", "open", "display",
    "tell", "see", "check", "bring", "summarize", "summarise", "read", "want", "need", "help",
    "please", "can", "could", "would", "will", "you", "me", "my", "mine", "i", "we", "our", "us",
    "what", "which", "who", "when", "where", "how", "is", "are", "was", "were", "be", "been",
    "do", "does", "did", "have", "has", "had", "any", "all", "some", "every", "there", "up",
    "out", "let",
    // time
    "today", "yesterday", "tomorrow", "now", "current", "currently", "this", "week", "month",
    "year", "day", "days", "weeks", "months", "ago", "recently", "soon", "time", "scheduled",
    "latest", "recent", "newest", "oldest", "earliest", "first", "last", "next", "previous",
    "past", "upcoming", "future", "coming", "new", "old",
    // quantity
    "top", "few", "many", "much", "more", "most", "number", "count", "one", "ones",
    // connectors
    "a", "an", "the", "of", "for", "about", "on", "in", "at", "with", "and", "or", "by", "from",
    "to", "cc", "bcc", "sent", "received", "regarding", "related", "that", "these", "those",
    "its", "it", "them", "their",
];

pub(crate) fn is_generic(word: &str) -> bool {
    GENERIC_WORDS.contains(&word) || word.chars().all(|c| !c.is_alphanumeric())
}

/// Small talk that never needs retrieval.
const SMALL_TALK: &[&str] = &[
    "hi", "hello", "hey", "hiya", "yo", "thanks", "thank", "thx", "ty", "you", "so", "much",
    "good", "morning", "afternoon", "evening", "night", "bye", "goodbye", "cheers", "ok", "okay",
    "cool", "great", "nice", "awesome", "how", "are", "is", "it", "going", "doing", "sup",
    "there", "again", "a", "lot", "appreciate", "perfect",
];

/// Greeting or thanks, with nothing else to look up.
pub(crate) fn is_small_talk(tokens: &[Token<'_>]) -> bool {
    !tokens.is_empty()
        && tokens.iter().any(|t| {
            matches!(
                t.lower.as_str(),
                "hi" | "hello" | "hey" | "hiya" | "thanks" | "thank" | "thx" | "ty" | "bye"
                    | "goodbye" | "cheers" | "good" | "sup" | "ok" | "okay"
            )
        })
        && tokens.iter().all(|t| SMALL_TALK.contains(&t.lower.as_str()))
}
