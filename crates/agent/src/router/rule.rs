//! Deterministic, lexicon-driven router. No model call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sift_core::message::{Conversation, Utterance};
use sift_core::query::{Entity, QueryClassification, QueryFilters, Route, TemporalDirection};
use tracing::debug;

use super::lexicon::{self, Token};
use super::{QueryRouter, followup, participants, time};

/// Words before a number that make it a result count ("last 5", "top 3").
const COUNT_LEADS: &[&str] = &[
    "last", "latest", "first", "top", "recent", "newest", "oldest", "earliest", "next",
];

/// Classifies utterances from fixed word tables.
///
/// Identical input (utterance, conversation, reference time) always yields
/// an identical route.
#[derive(Debug, Clone, Default)]
pub struct RuleRouter {
    reference_time: Option<DateTime<Utc>>,
}

impl RuleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin "now" for relative time expressions.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn classify(&self, utterance: &Utterance, conversation: &Conversation) -> Route {
        self.classify_at(utterance, conversation, self.reference_time.unwrap_or_else(Utc::now))
    }

    /// Classify relative to `now`.
    pub fn classify_at(&self, utterance: &Utterance, conversation: &Conversation, now: DateTime<Utc>) -> Route {
        let text = utterance.text.trim();
        let tokens = lexicon::tokenize(text);

        if tokens.is_empty() {
            return if utterance.attachments.is_empty() {
                Route::Conversational
            } else {
                Route::Retrieve(QueryClassification::unfiltered())
            };
        }
        if utterance.attachments.is_empty() && lexicon::is_small_talk(&tokens) {
            return Route::Conversational;
        }
        if let Some(answer) = clock_answer(&text.to_lowercase(), now) {
            return Route::DirectAnswer(answer);
        }

        let previous = conversation.preceding_assistant_turn().map(|m| m.content.as_str());
        let rewritten = followup::resolve(text, &tokens, previous);

        let classification = match &rewritten {
            Some(rewritten) => {
                let mut c = classify_text(rewritten, &lexicon::tokenize(rewritten), now);
                c.is_follow_up = true;
                c.rewritten_query = Some(rewritten.clone());
                c
            }
            None => classify_text(text, &tokens, now),
        };

        debug!(
            intent = ?classification.intent,
            follow_up = classification.is_follow_up,
            "rule router classified utterance"
        );
        Route::Retrieve(classification)
    }
}

#[async_trait]
impl QueryRouter for RuleRouter {
    fn name(&self) -> &str {
        "rule"
    }

    async fn route(&self, utterance: &Utterance, conversation: &Conversation) -> sift_core::Result<Route> {
        Ok(self.classify(utterance, conversation))
    }
}

/// Questions about the current date or time need no retrieval.
fn clock_answer(lower: &str, now: DateTime<Utc>) -> Option<String> {
    let lower = lower.trim_end_matches(['?', '!', '.']).trim();
    match lower {
        "what day is it" | "what's the date" | "what is the date" | "what is today's date"
        | "what's today's date" | "what date is it" => {
            Some(format!("Today is {}.", now.format("%A, %B %-d, %Y")))
        }
        "what time is it" | "what's the time" | "what is the time" => {
            Some(format!("It is {} UTC.", now.format("%H:%M")))
        }
        _ => None,
    }
}

/// Extract filters from one utterance text.
fn classify_text(text: &str, tokens: &[Token<'_>], now: DateTime<Utc>) -> QueryClassification {
    let mut taken = vec![false; tokens.len()];
    let mut filters = QueryFilters::default();

    if let Some(expr) = time::find(tokens, now) {
        filters.time_range = Some(expr.range);
        taken[expr.tokens].iter_mut().for_each(|t| *t = true);
    }

    for (i, token) in tokens.iter().enumerate() {
        if let Some((app, entity)) = lexicon::scope_term(&token.lower) {
            if !filters.apps.contains(&app) {
                filters.apps.push(app);
            }
            if !filters.entities.contains(&entity) {
                filters.entities.push(entity);
            }
            taken[i] = true;
        }
    }

    let message_query = filters.single_entity() == Some(Entity::Message);
    let extracted = participants::extract(text, tokens, &taken, message_query);
    for i in &extracted.consumed {
        taken[*i] = true;
    }
    filters.participants = extracted.participants;

    for (i, token) in tokens.iter().enumerate() {
        if taken[i] {
            continue;
        }
        let Some(n) = token.number().filter(|n| (1..=100).contains(n)) else {
            continue;
        };
        let is_digit = token.lower.chars().all(|c| c.is_ascii_digit());
        let after_lead = i > 0 && COUNT_LEADS.contains(&tokens[i - 1].lower.as_str());
        let before_scope = tokens
            .get(i + 1)
            .is_some_and(|t| lexicon::scope_term(&t.lower).is_some());
        if before_scope || is_digit && after_lead {
            filters.count = Some(n);
            taken[i] = true;
            break;
        }
    }

    filters.sort_direction = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| !taken[*i])
        .find_map(|(_, t)| lexicon::sort_word(&t.lower));

    let temporal_direction = if filters.single_entity() == Some(Entity::Event) {
        temporal_direction(tokens)
    } else {
        None
    };

    let residue: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|(i, t)| {
            !taken[*i]
                && !lexicon::is_generic(&t.lower)
                && lexicon::sort_word(&t.lower).is_none()
                && lexicon::temporal_word(&t.lower).is_none()
        })
        .map(|(_, t)| t.raw)
        .collect();
    if !residue.is_empty() {
        filters.filter_query = Some(residue.join(" "));
    }

    let mut classification = QueryClassification::from_filters(filters);
    classification.temporal_direction = temporal_direction;
    classification
}

fn temporal_direction(tokens: &[Token<'_>]) -> Option<TemporalDirection> {
    tokens.iter().find_map(|t| lexicon::temporal_word(&t.lower))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sift_core::message::{Attachment, Message};
    use sift_core::query::{App, Intent, SortDirection};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 12, 15, 30, 0).unwrap()
    }

    fn classify(text: &str) -> QueryClassification {
        match RuleRouter::new().classify_at(&Utterance::new(text), &Conversation::new(), now()) {
            Route::Retrieve(c) => c,
            other => panic!("expected retrieval, got {other:?}"),
        }
    }

    #[test]
    fn oldest_meeting_with_finance_team() {
        let c = classify("oldest meeting with finance team");
        assert_eq!(c.filters.apps, vec![App::Calendar]);
        assert_eq!(c.filters.entities, vec![Entity::Event]);
        assert_eq!(c.temporal_direction, Some(TemporalDirection::Prev));
        assert_eq!(c.filters.sort_direction, Some(SortDirection::Asc));
        assert_eq!(c.filters.filter_query.as_deref(), Some("finance team"));
        assert_eq!(c.intent, Intent::SearchWithFilters);
    }

    #[test]
    fn enormous_relative_span_still_classifies() {
        let c = classify("emails from the last 4000000000 weeks");
        assert_eq!(c.filters.apps, vec![App::Mail]);
        let range = c.filters.time_range.unwrap();
        assert_eq!(range.start, None);
        assert!(range.end.is_some());
    }

    #[test]
    fn current_emails() {
        let c = classify("current emails");
        assert_eq!(c.filters.apps, vec![App::Mail]);
        assert_eq!(c.filters.entities, vec![Entity::Message]);
        assert_eq!(c.filters.filter_query, None);
        assert_eq!(c.temporal_direction, None);
        assert_eq!(c.intent, Intent::GetItems);
    }

    #[test]
    fn temporal_direction_only_for_events() {
        assert_eq!(classify("latest emails").temporal_direction, None);
        assert_eq!(classify("latest emails").filters.sort_direction, Some(SortDirection::Desc));
        assert_eq!(
            classify("upcoming meetings").temporal_direction,
            Some(TemporalDirection::Next)
        );
        assert_eq!(classify("upcoming meetings").filters.sort_direction, None);
    }

    #[test]
    fn counts_and_time_bounds() {
        let c = classify("last 5 emails from Dana Ruiz");
        assert_eq!(c.filters.count, Some(5));
        assert_eq!(c.filters.sort_direction, Some(SortDirection::Desc));
        assert_eq!(c.filters.participants.from, vec!["Dana Ruiz"]);
        assert_eq!(c.intent, Intent::SearchWithFilters);

        let c = classify("meetings this week");
        let range = c.filters.time_range.unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()));
        assert_eq!(c.intent, Intent::GetItems);
    }

    #[test]
    fn open_search_without_scope() {
        let c = classify("what did we decide about the vendor contract?");
        assert!(c.filters.apps.is_empty());
        assert_eq!(c.filters.filter_query.as_deref(), Some("decide vendor contract"));
        assert_eq!(c.intent, Intent::SearchWithoutFilters);
    }

    #[test]
    fn multiple_scopes_are_open_search() {
        let c = classify("emails and files about the offsite");
        assert_eq!(c.filters.apps, vec![App::Mail, App::Drive]);
        assert_eq!(c.intent, Intent::SearchWithoutFilters);
    }

    #[test]
    fn bare_address_in_mail_query_is_sender() {
        let c = classify("emails ana@example.com");
        assert_eq!(c.filters.participants.from, vec!["ana@example.com"]);
        assert_eq!(c.filters.filter_query, None);
    }

    #[test]
    fn small_talk_is_conversational() {
        let router = RuleRouter::new();
        let route = router.classify_at(&Utterance::new("thanks!"), &Conversation::new(), now());
        assert_eq!(route, Route::Conversational);
    }

    #[test]
    fn clock_questions_answer_directly() {
        let route = RuleRouter::new().classify_at(&Utterance::new("What day is it?"), &Conversation::new(), now());
        assert_eq!(route, Route::DirectAnswer("Today is Thursday, March 12, 2026.".into()));
    }

    #[test]
    fn attachment_only_turn_retrieves() {
        let utterance = Utterance::new("").with_attachment(Attachment::Link {
            url: "https://docs.example.com/d/1".into(),
            doc_id: None,
        });
        let route = RuleRouter::new().classify_at(&utterance, &Conversation::new(), now());
        assert_eq!(route, Route::Retrieve(QueryClassification::unfiltered()));
    }

    #[test]
    fn follow_up_rewrites_against_previous_answer() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("find budget files"));
        conversation.push(Message::assistant(
            "Two files match:\n1. Q3 Budget Review [0]\n2. Q4 Forecast [1]",
        ));

        let route = RuleRouter::new().classify_at(&Utterance::new("open the second one"), &conversation, now());
        let c = route.classification().unwrap();
        assert!(c.is_follow_up);
        assert_eq!(c.rewritten_query.as_deref(), Some("open Q4 Forecast"));
        assert_eq!(c.filters.filter_query.as_deref(), Some("Q4 Forecast"));
    }

    #[test]
    fn no_follow_up_without_marker() {
        let mut conversation = Conversation::new();
        conversation.push(Message::assistant("The Q3 Budget Review is due Friday."));
        let route = RuleRouter::new().classify_at(&Utterance::new("Q3 budget owners"), &conversation, now());
        let c = route.classification().unwrap();
        assert!(!c.is_follow_up);
        assert_eq!(c.rewritten_query, None);
    }

    #[test]
    fn deterministic() {
        let router = RuleRouter::new().with_reference_time(now());
        let utterance = Utterance::new("files from Ana Lima last month about hiring");
        let conversation = Conversation::new();
        let first = serde_json::to_string(&router.classify(&utterance, &conversation)).unwrap();
        for _ in 0..5 {
            let again = serde_json::to_string(&router.classify(&utterance, &conversation)).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn every_field_serializes() {
        let value = serde_json::to_value(classify("current emails")).unwrap();
        for key in ["type", "rewritten_query", "is_follow_up", "temporal_direction", "filters"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        for key in ["apps", "entities", "sort_direction", "filter_query", "participants", "count", "offset", "time_range"] {
            assert!(value["filters"].get(key).is_some(), "missing filters.{key}");
        }
    }
}
