//! Role-tagged participant extraction ("from Ana Lima", "sent to ops@acme.io").

use sift_core::query::Participants;

use super::lexicon::{self, ParticipantRole, Token};

/// Participants found in an utterance and the token indices they used.
#[derive(Debug, Default)]
pub(crate) struct Extracted {
    pub participants: Participants,
    pub consumed: Vec<usize>,
}

fn is_name_word(token: &Token<'_>) -> bool {
    token.is_title_case()
        && !lexicon::WEEKDAYS_AND_MONTHS.contains(&token.lower.as_str())
        && lexicon::scope_term(&token.lower).is_none()
        && !lexicon::is_generic(&token.lower)
}

fn cue_at(tokens: &[Token<'_>], i: usize) -> Option<(ParticipantRole, usize)> {
    lexicon::ROLE_CUES.iter().find_map(|(words, role)| {
        let matches = words
            .iter()
            .enumerate()
            .all(|(k, w)| tokens.get(i + k).is_some_and(|t| t.lower == *w));
        matches.then_some((*role, words.len()))
    })
}

fn push(participants: &mut Participants, role: ParticipantRole, name: String) {
    let list = match role {
        ParticipantRole::From => &mut participants.from,
        ParticipantRole::To => &mut participants.to,
        ParticipantRole::Cc => &mut participants.cc,
        ParticipantRole::Bcc => &mut participants.bcc,
    };
    if !list.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
        list.push(name);
    }
}

/// Extract participants after role cues. `taken[i]` marks tokens already
/// claimed by another extractor. For message queries, addresses without a
/// cue count as senders.
pub(crate) fn extract(text: &str, tokens: &[Token<'_>], taken: &[bool], message_query: bool) -> Extracted {
    let mut out = Extracted::default();
    let free = |i: usize, out: &Extracted| !taken[i] && !out.consumed.contains(&i);

    let mut i = 0;
    while i < tokens.len() {
        let Some((role, cue_len)) = cue_at(tokens, i).filter(|_| free(i, &out)) else {
            i += 1;
            continue;
        };

        let mut j = i + cue_len;
        let mut names = Vec::new();
        let mut used = Vec::new();
        while j < tokens.len() && free(j, &out) {
            if tokens[j].is_email() {
                names.push(tokens[j].raw.to_string());
                used.push(j);
                j += 1;
            } else if is_name_word(&tokens[j]) {
                let start = j;
                while j < tokens.len() && free(j, &out) && is_name_word(&tokens[j]) {
                    used.push(j);
                    j += 1;
                }
                names.push(text[tokens[start].span.start..tokens[j - 1].span.end].to_string());
            } else {
                break;
            }
            // "from Ana and Dana"
            let joined = tokens.get(j).is_some_and(|t| t.lower == "and")
                && tokens
                    .get(j + 1)
                    .is_some_and(|t| t.is_email() || is_name_word(t));
            if !joined {
                break;
            }
            used.push(j);
            j += 1;
        }

        if names.is_empty() {
            i += cue_len;
            continue;
        }
        out.consumed.extend(i..i + cue_len);
        out.consumed.extend(used);
        for name in names {
            push(&mut out.participants, role, name);
        }
        i = j;
    }

    if message_query {
        for (i, token) in tokens.iter().enumerate() {
            if token.is_email() && free(i, &out) {
                push(&mut out.participants, ParticipantRole::From, token.raw.to_string());
                out.consumed.push(i);
            }
        }
    }

    out
}
