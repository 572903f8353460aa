use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation-time snapshot of the acting user. Never re-resolved later.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    ChatMessage,
    Poll,
    Announcement,
    Summary,
    Audiobook,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::ChatMessage => "chat-message",
            ActivityKind::Poll => "poll",
            ActivityKind::Announcement => "announcement",
            ActivityKind::Summary => "summary",
            ActivityKind::Audiobook => "audiobook",
        }
    }
}

/// A comment on an activity. Addressable by `id` when the gateway assigned
/// one, otherwise by position in the stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub author: Author,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    /// Ids of users who voted for this option.
    #[serde(default)]
    pub votes: Vec<String>,
}

/// One unit of team content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub team_id: String,
    pub kind: ActivityKind,
    /// Title for announcements and summaries, question for polls.
    #[serde(default)]
    pub name: String,
    /// Attachment or source URL, when the kind carries one.
    #[serde(default)]
    pub links: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub likes: Vec<String>,
    /// Newest first.
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub poll_options: Vec<PollOption>,
    pub created_by: Author,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub team_id: String,
    pub text: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub total_members: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
}

impl Membership {
    pub fn role(&self) -> TeamRole {
        if self.roles.iter().any(|r| r == "owner") {
            TeamRole::Owner
        } else {
            TeamRole::Member
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub prefs: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: String,
    pub team_id: String,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub created_by: Author,
    pub created_at: DateTime<Utc>,
}

/// Per-team subscription status, read-only to consumers. Never gates the
/// merge algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Operation kind carried by a realtime push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    Create,
    Update,
    Delete,
}

/// A push notification from the realtime channel. `kinds` is the raw set of
/// event strings; `payload` is the current state of the affected document.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "events", default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    /// Classifies the event by the suffix of its kind strings. Returns
    /// `None` for anything unrecognized so the caller can drop it.
    pub fn op(&self) -> Option<EventOp> {
        for kind in &self.kinds {
            if kind.ends_with(".delete") {
                return Some(EventOp::Delete);
            }
            if kind.ends_with(".update") {
                return Some(EventOp::Update);
            }
            if kind.ends_with(".create") {
                return Some(EventOp::Create);
            }
        }
        None
    }
}
