//! The remote data gateway: account/session management, a document database
//! with query filters, teams with key-value preferences, file storage, and a
//! realtime channel keyed by collection.
//!
//! The gateway is always passed as an explicit handle; nothing in this crate
//! reaches for a global client.

pub mod codec;
pub mod http;
pub mod realtime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::types::{Membership, RealtimeEvent, Session, Team, User};

pub use http::HttpGateway;

/// A raw document as stored by the gateway: system fields plus the
/// application payload. Adaptation to domain types happens in [`codec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub data: serde_json::Map<String, Value>,
}

/// Query over a collection listing: equality filters, descending order on
/// creation time, and a result cap.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub equal: Vec<(String, String)>,
    pub order_desc_created: bool,
    pub limit: Option<u32>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal(mut self, field: &str, value: &str) -> Self {
        self.equal.push((field.to_string(), value.to_string()));
        self
    }

    pub fn order_desc_created(mut self) -> Self {
        self.order_desc_created = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Renders the gateway's string query syntax.
    pub fn render(&self) -> Vec<String> {
        let mut queries = Vec::new();
        for (field, value) in &self.equal {
            queries.push(format!("equal(\"{}\", [\"{}\"])", field, value));
        }
        if self.order_desc_created {
            queries.push("orderDesc(\"$createdAt\")".to_string());
        }
        if let Some(limit) = self.limit {
            queries.push(format!("limit({})", limit));
        }
        queries
    }
}

/// Document grants. Every team-scoped document carries the four grants bound
/// to the team's membership role; enforcement is server-side.
pub struct Permission;

impl Permission {
    pub fn team_grants(team_id: &str) -> Vec<String> {
        vec![
            format!("read(\"team:{team_id}\")"),
            format!("write(\"team:{team_id}\")"),
            format!("update(\"team:{team_id}\")"),
            format!("delete(\"team:{team_id}\")"),
        ]
    }
}

/// Result of a server-side function execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub status_code: u16,
    pub response_body: String,
}

/// A live realtime subscription. Events arrive on `events`; dropping the
/// subscription tears down the transport.
#[derive(Debug)]
pub struct Subscription {
    pub events: Receiver<RealtimeEvent>,
    pump: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(events: Receiver<RealtimeEvent>, pump: JoinHandle<()>) -> Self {
        Self { events, pump }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Channel path for document events of one collection.
pub fn collection_channel(database_id: &str, collection_id: &str) -> String {
    format!("databases.{database_id}.collections.{collection_id}.documents")
}

#[async_trait]
pub trait Gateway: Send + Sync {
    // Identity
    async fn create_account(&self, email: &str, password: &str, name: Option<&str>)
    -> Result<User>;
    async fn create_session(&self, email: &str, password: &str) -> Result<Session>;
    async fn delete_session(&self) -> Result<()>;
    async fn current_user(&self) -> Result<User>;
    async fn update_user_prefs(&self, prefs: serde_json::Map<String, Value>) -> Result<User>;

    // Documents
    async fn create_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
        permissions: &[String],
    ) -> Result<Document>;
    async fn get_document(&self, collection_id: &str, document_id: &str) -> Result<Document>;
    async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
    ) -> Result<Document>;
    async fn delete_document(&self, collection_id: &str, document_id: &str) -> Result<()>;
    async fn list_documents(
        &self,
        collection_id: &str,
        query: DocumentQuery,
    ) -> Result<Vec<Document>>;

    // Teams
    async fn list_teams(&self) -> Result<Vec<Team>>;
    async fn create_team(&self, team_id: &str, name: &str) -> Result<Team>;
    async fn update_team_name(&self, team_id: &str, name: &str) -> Result<Team>;
    async fn delete_team(&self, team_id: &str) -> Result<()>;
    async fn list_memberships(&self, team_id: &str) -> Result<Vec<Membership>>;
    async fn get_team_prefs(&self, team_id: &str) -> Result<serde_json::Map<String, Value>>;
    async fn update_team_prefs(
        &self,
        team_id: &str,
        prefs: serde_json::Map<String, Value>,
    ) -> Result<()>;

    // Storage
    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        permissions: &[String],
    ) -> Result<String>;
    async fn delete_file(&self, bucket_id: &str, file_id: &str) -> Result<()>;
    /// Deterministic public view URL for a stored file. No signing, no
    /// rotation.
    fn file_view_url(&self, bucket_id: &str, file_id: &str) -> String;

    // Functions
    async fn execute_function(&self, function_id: &str, body: Value) -> Result<Execution>;

    // Realtime
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;
}
