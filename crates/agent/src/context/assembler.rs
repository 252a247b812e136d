//! Citation-indexed context assembly.
//!
//! Turns a ranked list of heterogeneous records into one prompt-ready text
//! block plus a parallel [`CitationTable`]. Record `i` of the input is
//! always rendered as `Index i` and cited as `[i]`.
//!
//! # Determinism
//!
//! Assembly is a pure function of its inputs: identical records and options
//! always produce byte-identical text and tables. No time-dependent logic is
//! used during assembly.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sift_core::query::{App, Entity};
use sift_core::record::{RetrievedRecord, ScoredChunk};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::context::clean::clean_text;
use crate::context::token;

// ── Types ─────────────────────────────────────────────────────────────────

/// Where a fragment came from, for rendering citations back to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub app: App,
    pub entity: Entity,
}

/// One record, normalized for a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFragment {
    pub id: String,
    /// Rendered fields and excerpts, without the index header.
    pub content: String,
    pub citation: Citation,
    /// The record's relevance score.
    pub confidence: f32,
}

/// Index → citation, in input order. Indices run `0..len` with no gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationTable {
    entries: Vec<Citation>,
}

fn citation_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").unwrap())
}

impl CitationTable {
    pub fn get(&self, index: usize) -> Option<&Citation> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Citation> {
        self.entries.iter()
    }

    /// Citations referenced by `[n]` markers in `answer`, in order of first
    /// mention. Out-of-range indices are ignored.
    pub fn resolve(&self, answer: &str) -> Vec<&Citation> {
        let mut seen = HashSet::new();
        citation_marker_re()
            .captures_iter(answer)
            .flat_map(|caps| {
                caps[1]
                    .split(',')
                    .filter_map(|n| n.trim().parse::<usize>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|i| seen.insert(*i))
            .filter_map(|i| self.entries.get(i))
            .collect()
    }
}

/// How sections are laid out in the rendered text. Indices never change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOrder {
    #[default]
    Input,
    /// Most recent first; undated records last.
    NewestFirst,
}

/// Options for one assembly.
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    /// Excerpts kept per record, best-scored first.
    pub max_chunks: usize,
    /// Records rendered in full, excerpts in document order.
    pub focused_ids: Vec<String>,
    pub order: SectionOrder,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            focused_ids: Vec::new(),
            order: SectionOrder::Input,
        }
    }
}

impl AssemblyOptions {
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn with_focused_ids(mut self, ids: Vec<String>) -> Self {
        self.focused_ids = ids;
        self
    }

    pub fn with_order(mut self, order: SectionOrder) -> Self {
        self.order = order;
        self
    }
}

/// The assembled evidence for one prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub citations: CitationTable,
    pub fragments: Vec<ContextFragment>,
    pub estimated_tokens: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless: create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Render `records` into indexed sections and a citation table.
    pub fn assemble(&self, records: &[RetrievedRecord], options: &AssemblyOptions) -> AssembledContext {
        let fragments: Vec<ContextFragment> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let focused = options.focused_ids.iter().any(|id| id == record.id());
                ContextFragment {
                    id: record.id().to_string(),
                    content: render_record(record, options.max_chunks, focused),
                    citation: Citation {
                        index,
                        id: record.id().to_string(),
                        title: record.title().to_string(),
                        url: record.url().map(str::to_string),
                        app: record.app(),
                        entity: record.entity(),
                    },
                    confidence: record.relevance(),
                }
            })
            .collect();

        let mut layout: Vec<usize> = (0..records.len()).collect();
        if options.order == SectionOrder::NewestFirst {
            // Stable: ties and undated records keep input order.
            layout.sort_by_key(|&i| std::cmp::Reverse(records[i].timestamp()));
        }

        let text = layout
            .iter()
            .map(|&i| format!("Index {}\n{}", i, fragments[i].content))
            .collect::<Vec<_>>()
            .join("\n\n");

        AssembledContext {
            estimated_tokens: token::estimate_tokens(&text),
            text,
            citations: CitationTable {
                entries: fragments.iter().map(|f| f.citation.clone()).collect(),
            },
            fragments,
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────

/// Excerpts for one record: top `max` by score, or all in document order
/// when focused.
fn select_chunks(chunks: &[ScoredChunk], max: usize, focused: bool) -> Vec<String> {
    let mut selected: Vec<&ScoredChunk> = chunks.iter().collect();
    if focused {
        selected.sort_by_key(|c| c.index);
    } else {
        selected.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        selected.truncate(max);
    }
    selected
        .into_iter()
        .map(|c| clean_text(&c.text))
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Default)]
struct Section {
    lines: Vec<String>,
}

impl Section {
    fn field(&mut self, label: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.map(clean_text).filter(|v| !v.is_empty()) {
            self.lines.push(format!("{label}: {value}"));
        }
        self
    }

    fn list(&mut self, label: &str, values: &[String]) -> &mut Self {
        if !values.is_empty() {
            self.lines.push(format!("{label}: {}", values.join(", ")));
        }
        self
    }

    fn time(&mut self, label: &str, value: Option<DateTime<Utc>>) -> &mut Self {
        if let Some(at) = value {
            self.lines.push(format!("{label}: {}", at.format("%Y-%m-%d %H:%M UTC")));
        }
        self
    }

    fn finish(&mut self, relevance: f32, excerpts: Vec<String>) -> String {
        self.lines.push(format!("Relevance: {relevance:.2}"));
        if !excerpts.is_empty() {
            self.lines.push(format!("Content:\n{}", excerpts.join("\n...\n")));
        }
        self.lines.join("\n")
    }
}

fn with_email(name: Option<&str>, email: Option<&str>) -> Option<String> {
    match (name, email) {
        (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
        (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
        (None, None) => None,
    }
}

fn render_record(record: &RetrievedRecord, max_chunks: usize, focused: bool) -> String {
    let mut s = Section::default();
    s.field("App", Some(record.app().as_str()))
        .field("Entity", Some(record.entity().as_str()));
    let excerpts = select_chunks(record.chunks(), max_chunks, focused);

    match record {
        RetrievedRecord::File(f) => {
            s.field("Title", Some(&f.title))
                .field("Owner", with_email(f.owner.as_deref(), f.owner_email.as_deref()).as_deref())
                .field("Type", f.mime_type.as_deref())
                .time("Created", f.created_at)
                .time("Updated", f.updated_at)
                .field("URL", f.url.as_deref());
            s.finish(f.relevance, excerpts)
        }
        RetrievedRecord::Mail(m) => {
            s.field("Subject", Some(&m.subject))
                .field("From", m.from.as_deref())
                .list("To", &m.to)
                .list("Cc", &m.cc)
                .list("Bcc", &m.bcc)
                .time("Date", m.timestamp)
                .list("Labels", &m.labels)
                .field("Thread", m.thread_id.as_deref());
            s.finish(m.relevance, excerpts)
        }
        RetrievedRecord::Person(p) => {
            s.field("Name", Some(&p.name))
                .field("Email", p.email.as_deref())
                .field("Job title", p.job_title.as_deref())
                .field("Department", p.department.as_deref())
                .field("Phone", p.phone.as_deref());
            s.finish(p.relevance, excerpts)
        }
        RetrievedRecord::Event(e) => {
            s.field("Title", Some(&e.title))
                .field("Organizer", e.organizer.as_deref())
                .list("Attendees", &e.attendees)
                .time("Start", e.start)
                .time("End", e.end)
                .field("Location", e.location.as_deref())
                .field("URL", e.url.as_deref());
            s.finish(e.relevance, excerpts)
        }
        RetrievedRecord::MailAttachment(a) => {
            s.field("Filename", Some(&a.filename))
                .field("From", a.from.as_deref())
                .field("Type", a.mime_type.as_deref())
                .time("Date", a.timestamp)
                .field("Mail", a.mail_id.as_deref());
            s.finish(a.relevance, excerpts)
        }
        RetrievedRecord::DataSourceFile(d) => {
            s.field("Title", Some(&d.title))
                .field("Source", Some(&d.source))
                .field("Uploaded by", d.uploaded_by.as_deref())
                .time("Date", d.timestamp)
                .field("URL", d.url.as_deref());
            s.finish(d.relevance, excerpts)
        }
        RetrievedRecord::ChatChannel(c) => {
            s.field("Name", Some(&c.name))
                .field("Topic", c.topic.as_deref())
                .list("Members", &c.members)
                .time("Updated", c.updated_at);
            s.finish(c.relevance, excerpts)
        }
    }
}
