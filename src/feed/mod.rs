//! The activity feed reconciler: merges bulk loads, locally-originated
//! writes, and remote push events into one consistent, duplicate-free,
//! ordered view per team.
//!
//! One team is active at a time. Selecting a team bumps a generation
//! counter; every load result and every remote event is tagged with the
//! generation it was issued under and discarded when stale, so in-flight
//! work for a previous team can never touch the current team's state.

pub mod state;

use std::sync::Mutex;

use tokio::sync::watch;

use crate::gateway::codec;
use crate::types::{Activity, ChatMessage, ConnectionStatus, EventOp, RealtimeEvent};

pub use state::{FeedItem, FeedState, FeedStats};

#[derive(Debug, Default)]
struct ReconcilerState {
    team_id: Option<String>,
    generation: u64,
    activities: FeedState<Activity>,
    messages: FeedState<ChatMessage>,
}

#[derive(Debug)]
pub struct FeedReconciler {
    inner: Mutex<ReconcilerState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Default for FeedReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedReconciler {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Mutex::new(ReconcilerState::default()),
            status_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReconcilerState> {
        // The mutex is only held for in-memory mutation, never across an
        // await, so poisoning can only follow a panic mid-mutation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Switches the active team. Tears down the previous team's state and
    /// returns the generation tag all work for this selection must carry.
    pub fn begin_team(&self, team_id: &str) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.team_id = Some(team_id.to_string());
        inner.activities = FeedState::new();
        inner.messages = FeedState::new();
        let _ = self.status_tx.send(ConnectionStatus::Connecting);
        inner.generation
    }

    /// Drops the active team entirely (sign-out, leaving the workspace).
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.team_id = None;
        inner.activities = FeedState::new();
        inner.messages = FeedState::new();
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }

    /// Installs a completed bulk load. Returns false (and changes nothing)
    /// when the load was issued for a team selection that is no longer
    /// current.
    pub fn complete_load(
        &self,
        generation: u64,
        activities: Vec<Activity>,
        messages: Vec<ChatMessage>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(
                target: "huddle::feed",
                "Discarding stale load (generation {} != {})",
                generation,
                inner.generation
            );
            return false;
        }
        inner.activities.replace_all(activities);
        inner.messages.replace_all(messages);
        true
    }

    pub fn mark_connected(&self, generation: u64) {
        let inner = self.lock();
        if inner.generation == generation {
            let _ = self.status_tx.send(ConnectionStatus::Connected);
        }
    }

    pub fn mark_disconnected(&self, generation: u64) {
        let inner = self.lock();
        if inner.generation == generation {
            let _ = self.status_tx.send(ConnectionStatus::Disconnected);
        }
    }

    /// Applies a locally-originated activity write, after the gateway has
    /// acknowledged it. Ignored when the activity belongs to another team.
    pub fn apply_local_activity(&self, activity: Activity) {
        let mut inner = self.lock();
        if inner.team_id.as_deref() == Some(activity.team_id.as_str()) {
            inner.activities.upsert(activity);
        }
    }

    pub fn apply_local_message(&self, message: ChatMessage) {
        let mut inner = self.lock();
        if inner.team_id.as_deref() == Some(message.team_id.as_str()) {
            inner.messages.upsert(message);
        }
    }

    /// Removes an activity after a confirmed delete.
    pub fn remove_activity(&self, activity_id: &str) {
        self.lock().activities.remove(activity_id);
    }

    /// Applies a pushed activity event. Stale generations, foreign teams,
    /// and malformed payloads are dropped without surfacing anything.
    pub fn apply_remote_activity_event(&self, generation: u64, event: &RealtimeEvent) {
        let Some(op) = event.op() else {
            tracing::debug!(target: "huddle::feed", "Dropping activity event without operation kind");
            return;
        };
        let Ok(doc) = codec::document_from_value(event.payload.clone()) else {
            tracing::debug!(target: "huddle::feed", "Dropping malformed activity event payload");
            return;
        };
        let activity = codec::activity_from_document(&doc);
        let mut inner = self.lock();
        if inner.generation != generation
            || inner.team_id.as_deref() != Some(activity.team_id.as_str())
        {
            return;
        }
        match op {
            EventOp::Create => {
                inner.activities.insert_if_absent(activity);
            }
            EventOp::Update => inner.activities.upsert(activity),
            EventOp::Delete => {
                inner.activities.remove(&activity.id);
            }
        }
    }

    pub fn apply_remote_message_event(&self, generation: u64, event: &RealtimeEvent) {
        let Some(op) = event.op() else {
            tracing::debug!(target: "huddle::feed", "Dropping message event without operation kind");
            return;
        };
        let Ok(doc) = codec::document_from_value(event.payload.clone()) else {
            tracing::debug!(target: "huddle::feed", "Dropping malformed message event payload");
            return;
        };
        let message = codec::message_from_document(&doc);
        let mut inner = self.lock();
        if inner.generation != generation
            || inner.team_id.as_deref() != Some(message.team_id.as_str())
        {
            return;
        }
        match op {
            EventOp::Create => {
                inner.messages.insert_if_absent(message);
            }
            EventOp::Update => inner.messages.upsert(message),
            EventOp::Delete => {
                inner.messages.remove(&message.id);
            }
        }
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.lock().activities.items().to_vec()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.items().to_vec()
    }

    pub fn activity(&self, activity_id: &str) -> Option<Activity> {
        self.lock().activities.get(activity_id).cloned()
    }

    pub fn current_team(&self) -> Option<String> {
        self.lock().team_id.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}
