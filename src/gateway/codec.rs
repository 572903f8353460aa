//! Adaptation between gateway wire documents and canonical domain types.
//!
//! The backend stores comments and poll options as arrays of JSON strings.
//! That representation does not leak past this module: everything above it
//! works with [`Comment`] and [`PollOption`] values. Decoding is tolerant of
//! the legacy shapes found in stored data (bare-text comments, unparseable
//! option strings).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HuddleError, Result};
use crate::types::{
    Activity, ActivityKind, Author, ChatMessage, Comment, OutboxRecord, PollOption,
};

use super::Document;

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireAuthor {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

impl From<WireAuthor> for Author {
    fn from(wire: WireAuthor) -> Self {
        Author {
            id: wire.id,
            name: wire.name,
            email: wire.email,
        }
    }
}

impl From<&Author> for WireAuthor {
    fn from(author: &Author) -> Self {
        WireAuthor {
            id: author.id.clone(),
            name: author.name.clone(),
            email: author.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    text: String,
    #[serde(default)]
    at: String,
    #[serde(default)]
    by: WireAuthor,
    #[serde(rename = "editedAt", default, skip_serializing_if = "Option::is_none")]
    edited_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePollOption {
    label: String,
    #[serde(default)]
    votes: Vec<String>,
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Decodes one stored comment string. A string that is not valid JSON is
/// kept as bare comment text with an empty author rather than dropped;
/// stored data predating the structured form looks like that.
pub fn decode_comment(raw: &str) -> Comment {
    match serde_json::from_str::<WireComment>(raw) {
        Ok(wire) => Comment {
            id: wire.id,
            text: wire.text,
            author: wire.by.into(),
            created_at: parse_timestamp(&wire.at),
            edited_at: wire.edited_at.as_deref().map(parse_timestamp),
        },
        Err(_) => Comment {
            id: None,
            text: raw.to_string(),
            author: Author::default(),
            created_at: DateTime::UNIX_EPOCH,
            edited_at: None,
        },
    }
}

pub fn encode_comment(comment: &Comment) -> Result<String> {
    let wire = WireComment {
        id: comment.id.clone(),
        text: comment.text.clone(),
        at: comment.created_at.to_rfc3339(),
        by: (&comment.author).into(),
        edited_at: comment.edited_at.map(|dt| dt.to_rfc3339()),
    };
    Ok(serde_json::to_string(&wire)?)
}

pub fn decode_comments(raw: &[Value]) -> Vec<Comment> {
    raw.iter()
        .filter_map(|item| item.as_str())
        .map(decode_comment)
        .collect()
}

pub fn encode_comments(comments: &[Comment]) -> Result<Vec<String>> {
    comments.iter().map(encode_comment).collect()
}

/// Decodes stored poll option strings. Unparseable entries are dropped; a
/// poll with no decodable options decodes to an empty option list.
pub fn decode_poll_options(raw: &[Value]) -> Vec<PollOption> {
    raw.iter()
        .filter_map(|item| item.as_str())
        .filter_map(|s| serde_json::from_str::<WirePollOption>(s).ok())
        .map(|wire| PollOption {
            label: wire.label,
            votes: wire.votes,
        })
        .collect()
}

pub fn encode_poll_options(options: &[PollOption]) -> Result<Vec<String>> {
    options
        .iter()
        .map(|option| {
            let wire = WirePollOption {
                label: option.label.clone(),
                votes: option.votes.clone(),
            };
            Ok(serde_json::to_string(&wire)?)
        })
        .collect()
}

fn field_str(doc: &Document, key: &str) -> String {
    doc.data
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn field_str_array(doc: &Document, key: &str) -> Vec<String> {
    doc.data
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn field_values(doc: &Document, key: &str) -> Vec<Value> {
    doc.data
        .get(key)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn kind_from_str(raw: &str) -> ActivityKind {
    match raw {
        "poll" => ActivityKind::Poll,
        "announcement" => ActivityKind::Announcement,
        "summary" => ActivityKind::Summary,
        "audiobook" => ActivityKind::Audiobook,
        _ => ActivityKind::ChatMessage,
    }
}

fn created_by(doc: &Document) -> Author {
    Author {
        id: field_str(doc, "createdById"),
        name: field_str(doc, "createdByName"),
        email: field_str(doc, "createdByEmail"),
    }
}

pub fn activity_from_document(doc: &Document) -> Activity {
    Activity {
        id: doc.id.clone(),
        team_id: field_str(doc, "teamId"),
        kind: kind_from_str(&field_str(doc, "type")),
        name: field_str(doc, "name"),
        links: field_str(doc, "links"),
        transcript: field_str(doc, "transcript"),
        file_id: field_str(doc, "fileId"),
        file_url: field_str(doc, "fileUrl"),
        likes: field_str_array(doc, "likes"),
        comments: decode_comments(&field_values(doc, "comments")),
        poll_options: decode_poll_options(&field_values(doc, "pollOptions")),
        created_by: created_by(doc),
        created_at: doc.created_at,
    }
}

pub fn message_from_document(doc: &Document) -> ChatMessage {
    ChatMessage {
        id: doc.id.clone(),
        team_id: field_str(doc, "teamId"),
        text: field_str(doc, "text"),
        author: Author {
            id: field_str(doc, "byId"),
            name: field_str(doc, "byName"),
            email: field_str(doc, "byEmail"),
        },
        created_at: doc.created_at,
    }
}

pub fn outbox_from_document(doc: &Document) -> OutboxRecord {
    OutboxRecord {
        id: doc.id.clone(),
        team_id: field_str(doc, "teamId"),
        subject: field_str(doc, "subject"),
        body: field_str(doc, "body"),
        recipients: field_str_array(doc, "recipients"),
        created_by: created_by(doc),
        created_at: doc.created_at,
    }
}

/// Parses a raw gateway JSON object (system fields prefixed with `$`) into a
/// [`Document`].
pub fn document_from_value(value: Value) -> Result<Document> {
    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(HuddleError::Gateway {
                status: 0,
                message: format!("expected document object, got {other}"),
            });
        }
    };
    let id = object
        .get("$id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HuddleError::Gateway {
            status: 0,
            message: "document missing $id".to_string(),
        })?
        .to_string();
    let created_at = object
        .get("$createdAt")
        .and_then(|v| v.as_str())
        .map(parse_timestamp)
        .unwrap_or(DateTime::UNIX_EPOCH);
    let updated_at = object
        .get("$updatedAt")
        .and_then(|v| v.as_str())
        .map(parse_timestamp);
    let data = object
        .into_iter()
        .filter(|(key, _)| !key.starts_with('$'))
        .collect();
    Ok(Document {
        id,
        created_at,
        updated_at,
        data,
    })
}
