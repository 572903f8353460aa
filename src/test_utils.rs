//! Shared test fixtures: an in-memory gateway double and a pre-wired
//! application handle backed by it.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::error::{HuddleError, Result};
use crate::gateway::{
    Document, DocumentQuery, Execution, Gateway, Subscription, codec, collection_channel,
};
use crate::types::{Activity, Membership, RealtimeEvent, Session, Team, User};
use crate::{Huddle, HuddleConfig};

pub fn test_user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        prefs: serde_json::Map::new(),
    }
}

pub fn create_test_config() -> (HuddleConfig, TempDir) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = HuddleConfig {
        endpoint: "https://mock.local/v1".to_string(),
        project_id: "test-project".to_string(),
        database_id: "main".to_string(),
        activities_collection: "activities".to_string(),
        messages_collection: "messages".to_string(),
        outbox_collection: "outbox".to_string(),
        storage_bucket: "media".to_string(),
        join_function_id: "join-fn".to_string(),
        audio_service_url: None,
        summary_service_url: None,
        email_service_url: None,
        logs_dir: temp.path().join("logs"),
    };
    (config, temp)
}

/// A [`Huddle`] wired to a [`MockGateway`], with the mock kept reachable for
/// seeding and failure injection.
pub struct TestHuddle {
    pub huddle: Huddle,
    pub gateway: Arc<MockGateway>,
}

impl TestHuddle {
    pub fn mock(&self) -> &MockGateway {
        &self.gateway
    }
}

impl std::fmt::Debug for TestHuddle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.huddle.fmt(f)
    }
}

impl Deref for TestHuddle {
    type Target = Huddle;
    fn deref(&self) -> &Huddle {
        &self.huddle
    }
}

impl DerefMut for TestHuddle {
    fn deref_mut(&mut self) -> &mut Huddle {
        &mut self.huddle
    }
}

pub async fn create_mock_huddle() -> (TestHuddle, TempDir) {
    let (config, temp) = create_test_config();
    let gateway = Arc::new(MockGateway::new());
    let huddle =
        Huddle::initialize(config, gateway.clone()).expect("Failed to initialize test huddle");
    (TestHuddle { huddle, gateway }, temp)
}

fn take_budget(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected_failure() -> HuddleError {
    HuddleError::NetworkTransient("injected failure".to_string())
}

/// In-memory gateway: accounts, documents, teams, files, one scripted
/// function execution, and realtime channels tests can push into.
pub struct MockGateway {
    accounts: Mutex<HashMap<String, (User, String)>>,
    current: Mutex<Option<User>>,
    collections: Mutex<HashMap<String, Vec<Document>>>,
    teams: Mutex<HashMap<String, Team>>,
    team_prefs: Mutex<HashMap<String, serde_json::Map<String, Value>>>,
    memberships: Mutex<HashMap<String, Vec<Membership>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    execution: Mutex<Option<(u16, String)>>,
    channels: Mutex<HashMap<String, mpsc::Sender<RealtimeEvent>>>,
    clock: AtomicI64,
    current_user_calls: AtomicU32,
    fail_current_user: AtomicU32,
    fail_lists: AtomicU32,
    fail_creates: AtomicU32,
    fail_updates: AtomicU32,
    fail_prefs_updates: AtomicU32,
    fail_file_deletes: AtomicU32,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            collections: Mutex::new(HashMap::new()),
            teams: Mutex::new(HashMap::new()),
            team_prefs: Mutex::new(HashMap::new()),
            memberships: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            execution: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            clock: AtomicI64::new(1_700_000_000),
            current_user_calls: AtomicU32::new(0),
            fail_current_user: AtomicU32::new(0),
            fail_lists: AtomicU32::new(0),
            fail_creates: AtomicU32::new(0),
            fail_updates: AtomicU32::new(0),
            fail_prefs_updates: AtomicU32::new(0),
            fail_file_deletes: AtomicU32::new(0),
        }
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let secs = self.clock.fetch_add(60, Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    // Seeding

    pub fn seed_user(&self, id: &str, name: &str, email: &str) {
        *self.current.lock().unwrap() = Some(User {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            prefs: serde_json::Map::new(),
        });
    }

    fn seed_document(&self, collection: &str, id: &str, data: Value) -> Document {
        let doc = Document {
            id: id.to_string(),
            created_at: self.next_timestamp(),
            updated_at: None,
            data: data.as_object().cloned().unwrap_or_default(),
        };
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        doc
    }

    pub fn seed_message(&self, id: &str, team_id: &str, text: &str) {
        self.seed_document(
            "messages",
            id,
            json!({
                "teamId": team_id,
                "text": text,
                "byId": "u1",
                "byName": "Ada",
                "byEmail": "ada@example.com",
            }),
        );
    }

    pub fn seed_activity(&self, id: &str, team_id: &str, kind: &str) -> Activity {
        let doc = self.seed_document(
            "activities",
            id,
            json!({
                "teamId": team_id,
                "type": kind,
                "name": "Seeded",
                "createdById": "u1",
                "createdByName": "Ada",
                "createdByEmail": "ada@example.com",
                "likes": [],
                "comments": [],
            }),
        );
        codec::activity_from_document(&doc)
    }

    pub fn seed_poll(&self, id: &str, team_id: &str, labels: &[&str]) -> Activity {
        let options: Vec<crate::types::PollOption> = labels
            .iter()
            .map(|label| crate::types::PollOption {
                label: label.to_string(),
                votes: Vec::new(),
            })
            .collect();
        let doc = self.seed_document(
            "activities",
            id,
            json!({
                "teamId": team_id,
                "type": "poll",
                "name": "Seeded poll",
                "pollOptions": codec::encode_poll_options(&options).unwrap(),
                "createdById": "u1",
                "createdByName": "Ada",
                "createdByEmail": "ada@example.com",
                "likes": [],
                "comments": [],
            }),
        );
        codec::activity_from_document(&doc)
    }

    /// Mutates a stored poll directly, as a concurrent session would.
    pub fn record_vote(&self, activity_id: &str, option_index: usize, user_id: &str) {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.get_mut("activities").expect("no activities");
        let doc = docs
            .iter_mut()
            .find(|d| d.id == activity_id)
            .expect("activity not seeded");
        let raw = doc
            .data
            .get("pollOptions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut options = codec::decode_poll_options(&raw);
        options[option_index].votes.push(user_id.to_string());
        doc.data.insert(
            "pollOptions".to_string(),
            json!(codec::encode_poll_options(&options).unwrap()),
        );
    }

    pub fn get_activity(&self, activity_id: &str) -> Activity {
        let collections = self.collections.lock().unwrap();
        let doc = collections
            .get("activities")
            .and_then(|docs| docs.iter().find(|d| d.id == activity_id))
            .expect("activity not stored");
        codec::activity_from_document(doc)
    }

    pub fn has_file(&self, file_id: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .keys()
            .any(|key| key.ends_with(&format!(":{file_id}")))
    }

    pub fn set_execution(&self, status_code: u16, body: &str) {
        *self.execution.lock().unwrap() = Some((status_code, body.to_string()));
    }

    /// Pushes a chat message event into the open messages subscription.
    pub async fn push_message_event(&self, kind: &str, id: &str, team_id: &str, text: &str) {
        let channel = collection_channel("main", "messages");
        let sender = self
            .channels
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .expect("no open messages subscription");
        let event = RealtimeEvent {
            kinds: vec![format!("{channel}.{id}.{kind}")],
            payload: json!({
                "$id": id,
                "$createdAt": self.next_timestamp().to_rfc3339(),
                "teamId": team_id,
                "text": text,
                "byId": "u1",
                "byName": "Ada",
                "byEmail": "ada@example.com",
            }),
        };
        sender.send(event).await.expect("subscription closed");
    }

    // Failure injection and call accounting

    pub fn current_user_calls(&self) -> u32 {
        self.current_user_calls.load(Ordering::SeqCst)
    }

    pub fn fail_current_user_transiently(&self, count: u32) {
        self.fail_current_user.store(count, Ordering::SeqCst);
    }

    pub fn fail_document_lists(&self, count: u32) {
        self.fail_lists.store(count, Ordering::SeqCst);
    }

    pub fn fail_document_creates(&self, count: u32) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_document_updates(&self, count: u32) {
        self.fail_updates.store(count, Ordering::SeqCst);
    }

    pub fn fail_team_prefs_updates(&self, count: u32) {
        self.fail_prefs_updates.store(count, Ordering::SeqCst);
    }

    pub fn fail_file_deletes(&self, count: u32) {
        self.fail_file_deletes.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(email) {
            return Err(HuddleError::Conflict(
                "user with the same email already exists".to_string(),
            ));
        }
        let user = User {
            id: format!("user-{}", accounts.len() + 1),
            name: name.unwrap_or_default().to_string(),
            email: email.to_string(),
            prefs: serde_json::Map::new(),
        };
        accounts.insert(email.to_string(), (user.clone(), password.to_string()));
        Ok(user)
    }

    async fn create_session(&self, email: &str, password: &str) -> Result<Session> {
        let accounts = self.accounts.lock().unwrap();
        match accounts.get(email) {
            Some((user, stored)) if stored == password => {
                *self.current.lock().unwrap() = Some(user.clone());
                Ok(Session {
                    id: format!("session-{}", user.id),
                    user_id: user.id.clone(),
                })
            }
            _ => Err(HuddleError::NotAuthenticated),
        }
    }

    async fn delete_session(&self) -> Result<()> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        if take_budget(&self.fail_current_user) {
            return Err(injected_failure());
        }
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or(HuddleError::NotAuthenticated)
    }

    async fn update_user_prefs(&self, prefs: serde_json::Map<String, Value>) -> Result<User> {
        let mut current = self.current.lock().unwrap();
        let user = current.as_mut().ok_or(HuddleError::NotAuthenticated)?;
        user.prefs = prefs;
        Ok(user.clone())
    }

    async fn create_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
        _permissions: &[String],
    ) -> Result<Document> {
        if take_budget(&self.fail_creates) {
            return Err(injected_failure());
        }
        Ok(self.seed_document(collection_id, document_id, data))
    }

    async fn get_document(&self, collection_id: &str, document_id: &str) -> Result<Document> {
        let collections = self.collections.lock().unwrap();
        collections
            .get(collection_id)
            .and_then(|docs| docs.iter().find(|d| d.id == document_id))
            .cloned()
            .ok_or_else(|| HuddleError::NotFound(format!("document {document_id}")))
    }

    async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        if take_budget(&self.fail_updates) {
            return Err(injected_failure());
        }
        let mut collections = self.collections.lock().unwrap();
        let doc = collections
            .get_mut(collection_id)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == document_id))
            .ok_or_else(|| HuddleError::NotFound(format!("document {document_id}")))?;
        if let Some(fields) = data.as_object() {
            for (key, value) in fields {
                doc.data.insert(key.clone(), value.clone());
            }
        }
        doc.updated_at = Some(Utc::now());
        Ok(doc.clone())
    }

    async fn delete_document(&self, collection_id: &str, document_id: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections
            .get_mut(collection_id)
            .ok_or_else(|| HuddleError::NotFound(format!("collection {collection_id}")))?;
        let before = docs.len();
        docs.retain(|d| d.id != document_id);
        if docs.len() == before {
            return Err(HuddleError::NotFound(format!("document {document_id}")));
        }
        Ok(())
    }

    async fn list_documents(
        &self,
        collection_id: &str,
        query: DocumentQuery,
    ) -> Result<Vec<Document>> {
        if take_budget(&self.fail_lists) {
            return Err(injected_failure());
        }
        let collections = self.collections.lock().unwrap();
        let mut docs: Vec<Document> = collections
            .get(collection_id)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| {
                        query.equal.iter().all(|(field, value)| {
                            doc.data.get(field).and_then(|v| v.as_str()) == Some(value.as_str())
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if query.order_desc_created {
            docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit as usize);
        }
        Ok(docs)
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.teams.lock().unwrap().values().cloned().collect())
    }

    async fn create_team(&self, team_id: &str, name: &str) -> Result<Team> {
        let team = Team {
            id: team_id.to_string(),
            name: name.to_string(),
            total_members: 1,
        };
        self.teams
            .lock()
            .unwrap()
            .insert(team_id.to_string(), team.clone());
        if let Some(user) = self.current.lock().unwrap().clone() {
            self.memberships.lock().unwrap().insert(
                team_id.to_string(),
                vec![Membership {
                    user_id: user.id,
                    user_name: user.name,
                    user_email: user.email,
                    roles: vec!["owner".to_string()],
                    confirmed: true,
                }],
            );
        }
        Ok(team)
    }

    async fn update_team_name(&self, team_id: &str, name: &str) -> Result<Team> {
        let mut teams = self.teams.lock().unwrap();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| HuddleError::NotFound(format!("team {team_id}")))?;
        team.name = name.to_string();
        Ok(team.clone())
    }

    async fn delete_team(&self, team_id: &str) -> Result<()> {
        self.teams
            .lock()
            .unwrap()
            .remove(team_id)
            .ok_or_else(|| HuddleError::NotFound(format!("team {team_id}")))?;
        self.memberships.lock().unwrap().remove(team_id);
        self.team_prefs.lock().unwrap().remove(team_id);
        Ok(())
    }

    async fn list_memberships(&self, team_id: &str) -> Result<Vec<Membership>> {
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .get(team_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_team_prefs(&self, team_id: &str) -> Result<serde_json::Map<String, Value>> {
        Ok(self
            .team_prefs
            .lock()
            .unwrap()
            .get(team_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_team_prefs(
        &self,
        team_id: &str,
        prefs: serde_json::Map<String, Value>,
    ) -> Result<()> {
        if take_budget(&self.fail_prefs_updates) {
            return Err(HuddleError::Gateway {
                status: 500,
                message: "injected prefs failure".to_string(),
            });
        }
        self.team_prefs
            .lock()
            .unwrap()
            .insert(team_id.to_string(), prefs);
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        _filename: &str,
        bytes: Vec<u8>,
        _permissions: &[String],
    ) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .insert(format!("{bucket_id}:{file_id}"), bytes);
        Ok(file_id.to_string())
    }

    async fn delete_file(&self, bucket_id: &str, file_id: &str) -> Result<()> {
        if take_budget(&self.fail_file_deletes) {
            return Err(HuddleError::Gateway {
                status: 500,
                message: "injected storage failure".to_string(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .remove(&format!("{bucket_id}:{file_id}"))
            .ok_or_else(|| HuddleError::NotFound(format!("file {file_id}")))?;
        Ok(())
    }

    fn file_view_url(&self, bucket_id: &str, file_id: &str) -> String {
        format!(
            "https://mock.local/v1/storage/buckets/{bucket_id}/files/{file_id}/view?project=test-project"
        )
    }

    async fn execute_function(&self, _function_id: &str, _body: Value) -> Result<Execution> {
        let scripted = self.execution.lock().unwrap().clone();
        let (status_code, response_body) = scripted.unwrap_or((
            404,
            "{\"success\":false,\"error\":\"no execution scripted\"}".to_string(),
        ));
        Ok(Execution {
            status_code,
            response_body,
        })
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(100);
        {
            let mut open = self.channels.lock().unwrap();
            for channel in channels {
                open.insert(channel.clone(), tx.clone());
            }
        }
        let pump = tokio::spawn(futures::future::pending::<()>());
        Ok(Subscription::new(rx, pump))
    }
}
