//! Retrieved records: the heterogeneous evidence the search collaborator returns.
//!
//! Record kinds form a closed set. Consumers match exhaustively, so adding a
//! kind is a compile error everywhere it needs rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::{App, Entity};

/// One excerpt of a record's body with the index's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Position of the chunk in the original document
    pub index: usize,
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

impl ScoredChunk {
    pub fn new(index: usize, text: impl Into<String>, score: f32) -> Self {
        Self { index, text: text.into(), score }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevance: f32,
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRecord {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevance: f32,
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub relevance: f32,
    /// Description excerpts
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailAttachmentRecord {
    pub id: String,
    pub filename: String,
    /// The message this attachment came with
    #[serde(default)]
    pub mail_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevance: f32,
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceFileRecord {
    pub id: String,
    pub title: String,
    /// Name of the connected data source
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevance: f32,
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChannelRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevance: f32,
    /// Recent message excerpts
    #[serde(default)]
    pub chunks: Vec<ScoredChunk>,
}

/// A record returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievedRecord {
    File(FileRecord),
    Mail(MailRecord),
    Person(PersonRecord),
    Event(EventRecord),
    MailAttachment(MailAttachmentRecord),
    DataSourceFile(DataSourceFileRecord),
    ChatChannel(ChatChannelRecord),
}

impl RetrievedRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::File(r) => &r.id,
            Self::Mail(r) => &r.id,
            Self::Person(r) => &r.id,
            Self::Event(r) => &r.id,
            Self::MailAttachment(r) => &r.id,
            Self::DataSourceFile(r) => &r.id,
            Self::ChatChannel(r) => &r.id,
        }
    }

    /// Display title: title, subject, name or filename depending on kind.
    pub fn title(&self) -> &str {
        match self {
            Self::File(r) => &r.title,
            Self::Mail(r) => &r.subject,
            Self::Person(r) => &r.name,
            Self::Event(r) => &r.title,
            Self::MailAttachment(r) => &r.filename,
            Self::DataSourceFile(r) => &r.title,
            Self::ChatChannel(r) => &r.name,
        }
    }

    pub fn relevance(&self) -> f32 {
        match self {
            Self::File(r) => r.relevance,
            Self::Mail(r) => r.relevance,
            Self::Person(r) => r.relevance,
            Self::Event(r) => r.relevance,
            Self::MailAttachment(r) => r.relevance,
            Self::DataSourceFile(r) => r.relevance,
            Self::ChatChannel(r) => r.relevance,
        }
    }

    /// Body excerpts. People have none.
    pub fn chunks(&self) -> &[ScoredChunk] {
        match self {
            Self::File(r) => &r.chunks,
            Self::Mail(r) => &r.chunks,
            Self::Person(_) => &[],
            Self::Event(r) => &r.chunks,
            Self::MailAttachment(r) => &r.chunks,
            Self::DataSourceFile(r) => &r.chunks,
            Self::ChatChannel(r) => &r.chunks,
        }
    }

    pub fn app(&self) -> App {
        match self {
            Self::File(_) => App::Drive,
            Self::Mail(_) | Self::MailAttachment(_) => App::Mail,
            Self::Person(_) => App::Directory,
            Self::Event(_) => App::Calendar,
            Self::DataSourceFile(_) => App::DataSource,
            Self::ChatChannel(_) => App::Chat,
        }
    }

    pub fn entity(&self) -> Entity {
        match self {
            Self::File(_) => Entity::File,
            Self::Mail(_) => Entity::Message,
            Self::Person(_) => Entity::Person,
            Self::Event(_) => Entity::Event,
            Self::MailAttachment(_) => Entity::Attachment,
            Self::DataSourceFile(_) => Entity::DataSourceFile,
            Self::ChatChannel(_) => Entity::Channel,
        }
    }

    /// The timestamp used for recency sorting.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::File(r) => r.updated_at.or(r.created_at),
            Self::Mail(r) => r.timestamp,
            Self::Person(_) => None,
            Self::Event(r) => r.start,
            Self::MailAttachment(r) => r.timestamp,
            Self::DataSourceFile(r) => r.timestamp,
            Self::ChatChannel(r) => r.updated_at,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::File(r) => r.url.as_deref(),
            Self::Event(r) => r.url.as_deref(),
            Self::DataSourceFile(r) => r.url.as_deref(),
            Self::Mail(_) | Self::Person(_) | Self::MailAttachment(_) | Self::ChatChannel(_) => None,
        }
    }

    pub fn set_relevance(&mut self, relevance: f32) {
        match self {
            Self::File(r) => r.relevance = relevance,
            Self::Mail(r) => r.relevance = relevance,
            Self::Person(r) => r.relevance = relevance,
            Self::Event(r) => r.relevance = relevance,
            Self::MailAttachment(r) => r.relevance = relevance,
            Self::DataSourceFile(r) => r.relevance = relevance,
            Self::ChatChannel(r) => r.relevance = relevance,
        }
    }

    pub fn chunks_mut(&mut self) -> Option<&mut Vec<ScoredChunk>> {
        match self {
            Self::File(r) => Some(&mut r.chunks),
            Self::Mail(r) => Some(&mut r.chunks),
            Self::Person(_) => None,
            Self::Event(r) => Some(&mut r.chunks),
            Self::MailAttachment(r) => Some(&mut r.chunks),
            Self::DataSourceFile(r) => Some(&mut r.chunks),
            Self::ChatChannel(r) => Some(&mut r.chunks),
        }
    }

    /// Everyone named on the record: owners, senders, recipients, attendees.
    pub fn people(&self) -> Vec<&str> {
        match self {
            Self::File(r) => r.owner.iter().chain(&r.owner_email).map(String::as_str).collect(),
            Self::Mail(r) => r
                .from
                .iter()
                .chain(&r.to)
                .chain(&r.cc)
                .chain(&r.bcc)
                .map(String::as_str)
                .collect(),
            Self::Person(r) => std::iter::once(&r.name).chain(&r.email).map(String::as_str).collect(),
            Self::Event(r) => r.organizer.iter().chain(&r.attendees).map(String::as_str).collect(),
            Self::MailAttachment(r) => r.from.iter().map(String::as_str).collect(),
            Self::DataSourceFile(r) => r.uploaded_by.iter().map(String::as_str).collect(),
            Self::ChatChannel(r) => r.members.iter().map(String::as_str).collect(),
        }
    }
}
