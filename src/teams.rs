//! Team operations: listing, creation with a shareable join code, renaming,
//! membership, join-by-code through the server-side function, and selecting
//! the active team (bulk load plus realtime subscription).

use rand::Rng;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::Huddle;
use crate::error::{HuddleError, Result};
use crate::gateway::{DocumentQuery, codec, collection_channel};
use crate::types::{Membership, Team, TeamRole};

/// Most recent activities fetched per team selection.
pub const ACTIVITIES_PAGE_LIMIT: u32 = 50;
/// Most recent chat messages fetched per team selection.
pub const MESSAGES_PAGE_LIMIT: u32 = 200;

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LENGTH: usize = 6;

pub(crate) fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

impl Huddle {
    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        self.gateway.list_teams().await
    }

    /// Creates a team and stores a generated join code in its preferences.
    /// A failure writing the code is logged and tolerated; the team exists
    /// either way and a code can be regenerated later.
    pub async fn create_team(&self, name: &str) -> Result<Team> {
        let team = self
            .gateway
            .create_team(&Uuid::new_v4().to_string(), name)
            .await?;
        let code = generate_join_code();
        let mut prefs = serde_json::Map::new();
        prefs.insert("joinCode".to_string(), json!(code));
        if let Err(e) = self.gateway.update_team_prefs(&team.id, prefs).await {
            tracing::warn!(
                target: "huddle::teams",
                "Created team {} but failed to store join code: {}",
                team.id,
                e
            );
        }
        Ok(team)
    }

    pub async fn rename_team(&self, team_id: &str, name: &str) -> Result<Team> {
        self.gateway.update_team_name(team_id, name).await
    }

    pub async fn delete_team(&self, team_id: &str) -> Result<()> {
        self.gateway.delete_team(team_id).await?;
        if self.feed.current_team().as_deref() == Some(team_id) {
            self.abort_pumps();
            self.feed.reset();
        }
        Ok(())
    }

    pub async fn members(&self, team_id: &str) -> Result<Vec<Membership>> {
        self.gateway.list_memberships(team_id).await
    }

    /// The user's role in a team, from its membership list.
    pub async fn role_in_team(&self, team_id: &str, user_id: &str) -> Result<TeamRole> {
        let memberships = self.gateway.list_memberships(team_id).await?;
        memberships
            .iter()
            .find(|m| m.user_id == user_id)
            .map(Membership::role)
            .ok_or_else(|| HuddleError::NotFound(format!("no membership in team {team_id}")))
    }

    /// The team's join code, when one has been stored.
    pub async fn join_code(&self, team_id: &str) -> Result<Option<String>> {
        let prefs = self.gateway.get_team_prefs(team_id).await?;
        Ok(prefs
            .get("joinCode")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Joins a team through the server-side function that resolves a join
    /// code to a membership.
    ///
    /// The function reports a structured `success` flag, but its transport
    /// contract has a wrinkle this client must keep: a 409 response means
    /// the membership already exists, and is a success, exactly when its
    /// error text contains "already". Any other 409 is a real conflict.
    pub async fn join_by_code(&self, code: &str) -> Result<()> {
        if self.config.join_function_id.trim().is_empty() {
            return Err(HuddleError::Configuration(
                "join function id is not set".to_string(),
            ));
        }
        let execution = self
            .gateway
            .execute_function(
                &self.config.join_function_id,
                json!({ "joinCode": code, "path": "/join-by-code" }),
            )
            .await?;
        let parsed: Option<Value> = serde_json::from_str(&execution.response_body).ok();
        let success = parsed
            .as_ref()
            .and_then(|v| v.get("success"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if success || execution.status_code == 200 || execution.status_code == 0 {
            return Ok(());
        }
        let error_text = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| execution.response_body.clone());
        if execution.status_code == 409 {
            if error_text.to_lowercase().contains("already") {
                tracing::debug!(
                    target: "huddle::teams",
                    "Join reported existing membership, treating as success"
                );
                return Ok(());
            }
            return Err(HuddleError::Conflict(error_text));
        }
        if execution.status_code == 404 {
            return Err(HuddleError::NotFound(error_text));
        }
        Err(HuddleError::Gateway {
            status: execution.status_code,
            message: error_text,
        })
    }

    /// Selects the active team: tears down the previous selection, bulk
    /// loads the most recent activities and chat messages, and opens the
    /// realtime subscriptions that keep the feed current.
    pub async fn select_team(&self, team_id: &str) -> Result<()> {
        self.abort_pumps();
        let generation = self.feed.begin_team(team_id);

        let (activities, messages) = match self.fetch_team_page(team_id).await {
            Ok(page) => page,
            Err(e) => {
                self.feed.mark_disconnected(generation);
                return Err(e);
            }
        };
        self.feed.complete_load(generation, activities, messages);

        let activities_channel =
            collection_channel(&self.config.database_id, &self.config.activities_collection);
        let messages_channel =
            collection_channel(&self.config.database_id, &self.config.messages_collection);
        let activity_sub = self.gateway.subscribe(&[activities_channel]).await;
        let message_sub = self.gateway.subscribe(&[messages_channel]).await;
        let (mut activity_sub, mut message_sub) = match (activity_sub, message_sub) {
            (Ok(a), Ok(m)) => (a, m),
            (Err(e), _) | (_, Err(e)) => {
                self.feed.mark_disconnected(generation);
                return Err(e);
            }
        };
        self.feed.mark_connected(generation);

        let feed = self.feed.clone();
        let activity_pump = tokio::spawn(async move {
            while let Some(event) = activity_sub.events.recv().await {
                feed.apply_remote_activity_event(generation, &event);
            }
            feed.mark_disconnected(generation);
        });
        let feed = self.feed.clone();
        let message_pump = tokio::spawn(async move {
            while let Some(event) = message_sub.events.recv().await {
                feed.apply_remote_message_event(generation, &event);
            }
            feed.mark_disconnected(generation);
        });

        let mut pumps = self
            .pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pumps.push(activity_pump);
        pumps.push(message_pump);
        Ok(())
    }

    /// Refetches the active team's page without clearing current state. A
    /// failed refresh keeps the last-known-good lists and returns the error
    /// for a manual retry.
    pub async fn refresh(&self) -> Result<()> {
        let Some(team_id) = self.feed.current_team() else {
            return Ok(());
        };
        let generation = self.feed.generation();
        let (activities, messages) = self.fetch_team_page(&team_id).await?;
        self.feed.complete_load(generation, activities, messages);
        Ok(())
    }

    async fn fetch_team_page(
        &self,
        team_id: &str,
    ) -> Result<(Vec<crate::types::Activity>, Vec<crate::types::ChatMessage>)> {
        let activities_query = DocumentQuery::new()
            .equal("teamId", team_id)
            .order_desc_created()
            .limit(ACTIVITIES_PAGE_LIMIT);
        let messages_query = DocumentQuery::new()
            .equal("teamId", team_id)
            .order_desc_created()
            .limit(MESSAGES_PAGE_LIMIT);
        let (activity_docs, message_docs) = tokio::join!(
            self.gateway
                .list_documents(&self.config.activities_collection, activities_query),
            self.gateway
                .list_documents(&self.config.messages_collection, messages_query),
        );
        let activities = activity_docs?
            .iter()
            .map(codec::activity_from_document)
            .collect();
        let messages = message_docs?
            .iter()
            .map(codec::message_from_document)
            .collect();
        Ok((activities, messages))
    }
}
