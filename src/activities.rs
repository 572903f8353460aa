//! Operations on team activities: creation of every activity kind, likes,
//! comments, poll votes, and deletion with backing-file cleanup.
//!
//! Creations are optimistic-after-confirm: the gateway acknowledges first,
//! then the acknowledged state is applied to the local feed. Comment
//! mutations are the exception: they update the local copy immediately for
//! responsiveness, then reconcile against a read-modify-write of the latest
//! persisted state, rolling the local copy back when the write fails.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use uuid::Uuid;

use crate::Huddle;
use crate::error::{HuddleError, Result};
use crate::gateway::{Permission, codec};
use crate::services::GeneratedAudio;
use crate::types::{Activity, ChatMessage, Comment, PollOption, TeamRole, User};

/// How a comment is addressed within an activity: by its gateway-assigned
/// id when it has one, by stored position otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentRef {
    Id(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// The user already appears in some option's vote set; nothing changed.
    AlreadyVoted,
}

fn find_comment(comments: &[Comment], comment_ref: &CommentRef) -> Option<usize> {
    match comment_ref {
        CommentRef::Id(id) => comments
            .iter()
            .position(|c| c.id.as_deref() == Some(id.as_str())),
        CommentRef::Index(index) => (*index < comments.len()).then_some(*index),
    }
}

fn file_id_from_view_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/files/")?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

fn bucket_from_view_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/storage/buckets/")?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

impl Huddle {
    async fn create_activity_document(
        &self,
        team_id: &str,
        data: serde_json::Value,
    ) -> Result<Activity> {
        let doc = self
            .gateway
            .create_document(
                &self.config.activities_collection,
                &Uuid::new_v4().to_string(),
                data,
                &Permission::team_grants(team_id),
            )
            .await?;
        let activity = codec::activity_from_document(&doc);
        self.feed.apply_local_activity(activity.clone());
        Ok(activity)
    }

    /// Sends a chat message to the team.
    pub async fn send_message(&self, team_id: &str, text: &str, user: &User) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::InvalidInput("message text is empty".to_string()));
        }
        let doc = self
            .gateway
            .create_document(
                &self.config.messages_collection,
                &Uuid::new_v4().to_string(),
                json!({
                    "teamId": team_id,
                    "text": text,
                    "byId": user.id,
                    "byName": user.name,
                    "byEmail": user.email,
                }),
                &Permission::team_grants(team_id),
            )
            .await?;
        let message = codec::message_from_document(&doc);
        self.feed.apply_local_message(message.clone());
        Ok(message)
    }

    /// Creates a poll with 2 to 4 options; blank options are dropped before
    /// the bounds check.
    pub async fn create_poll(
        &self,
        team_id: &str,
        question: &str,
        options: &[String],
        user: &User,
    ) -> Result<Activity> {
        let cleaned: Vec<PollOption> = options
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
            .map(|label| PollOption {
                label: label.to_string(),
                votes: Vec::new(),
            })
            .collect();
        if cleaned.len() < 2 || cleaned.len() > 4 {
            return Err(HuddleError::InvalidInput(
                "a poll needs between 2 and 4 options".to_string(),
            ));
        }
        self.create_activity_document(
            team_id,
            json!({
                "teamId": team_id,
                "name": question.trim(),
                "type": "poll",
                "pollOptions": codec::encode_poll_options(&cleaned)?,
                "createdById": user.id,
                "createdByName": user.name,
                "createdByEmail": user.email,
                "likes": [],
                "comments": [],
            }),
        )
        .await
    }

    /// Posts an announcement, optionally with an attached image whose view
    /// URL becomes the activity's link.
    pub async fn post_announcement(
        &self,
        team_id: &str,
        text: &str,
        image: Option<(&str, Vec<u8>)>,
        user: &User,
    ) -> Result<Activity> {
        let mut file_id = String::new();
        let mut image_url = String::new();
        if let Some((filename, bytes)) = image {
            file_id = self
                .gateway
                .upload_file(
                    &self.config.storage_bucket,
                    &Uuid::new_v4().to_string(),
                    filename,
                    bytes,
                    &Permission::team_grants(team_id),
                )
                .await?;
            image_url = self
                .gateway
                .file_view_url(&self.config.storage_bucket, &file_id);
        }
        self.create_activity_document(
            team_id,
            json!({
                "teamId": team_id,
                "name": "Announcement",
                "links": image_url,
                "fileId": file_id,
                "transcript": text,
                "type": "announcement",
                "createdById": user.id,
                "createdByName": user.name,
                "createdByEmail": user.email,
                "likes": [],
                "comments": [],
            }),
        )
        .await
    }

    /// Shares a generated page summary with the source URL as its link.
    pub async fn share_summary(
        &self,
        team_id: &str,
        name: &str,
        source_url: &str,
        summary: &str,
        user: &User,
    ) -> Result<Activity> {
        self.create_activity_document(
            team_id,
            json!({
                "teamId": team_id,
                "name": name.trim(),
                "links": source_url.trim(),
                "transcript": summary,
                "type": "summary",
                "createdById": user.id,
                "createdByName": user.name,
                "createdByEmail": user.email,
                "likes": [],
                "comments": [],
            }),
        )
        .await
    }

    /// Uploads generated audio and shares it as an audiobook activity.
    pub async fn share_audiobook(
        &self,
        team_id: &str,
        audio: &GeneratedAudio,
        user: &User,
    ) -> Result<Activity> {
        let filename = format!("mini-audiobook-{}.mp3", Utc::now().timestamp_millis());
        let file_id = self
            .gateway
            .upload_file(
                &self.config.storage_bucket,
                &Uuid::new_v4().to_string(),
                &filename,
                audio.audio.clone(),
                &Permission::team_grants(team_id),
            )
            .await?;
        let file_url = self
            .gateway
            .file_view_url(&self.config.storage_bucket, &file_id);
        self.create_activity_document(
            team_id,
            json!({
                "teamId": team_id,
                "fileId": file_id,
                "fileUrl": file_url,
                "name": filename,
                "transcript": audio.transcript,
                "type": "audiobook",
                "createdById": user.id,
                "createdByName": user.name,
                "createdByEmail": user.email,
                "likes": [],
                "comments": [],
            }),
        )
        .await
    }

    /// Flips the user's membership in the activity's like set. Reads the
    /// latest persisted set first, issues one update, then applies the
    /// result locally. Single-flight per activity per user: a second toggle
    /// while one is running fails with [`HuddleError::LikeInFlight`].
    pub async fn toggle_like(&self, activity_id: &str, user_id: &str) -> Result<Activity> {
        let guard_key = format!("{activity_id}:{user_id}");
        match self.like_guards.entry(guard_key.clone()) {
            Entry::Occupied(_) => return Err(HuddleError::LikeInFlight),
            Entry::Vacant(vacant) => {
                vacant.insert(());
            }
        }
        let result = self.toggle_like_inner(activity_id, user_id).await;
        self.like_guards.remove(&guard_key);
        result
    }

    async fn toggle_like_inner(&self, activity_id: &str, user_id: &str) -> Result<Activity> {
        let doc = self
            .gateway
            .get_document(&self.config.activities_collection, activity_id)
            .await?;
        let current = codec::activity_from_document(&doc);
        let mut likes = current.likes.clone();
        if let Some(at) = likes.iter().position(|id| id == user_id) {
            likes.remove(at);
        } else {
            likes.insert(0, user_id.to_string());
        }
        let doc = self
            .gateway
            .update_document(
                &self.config.activities_collection,
                activity_id,
                json!({ "likes": likes }),
            )
            .await?;
        let updated = codec::activity_from_document(&doc);
        self.feed.apply_local_activity(updated.clone());
        Ok(updated)
    }

    /// Adds a comment. The local copy is updated immediately; the persisted
    /// comment list is then read, mutated and written back, and the local
    /// copy reconciled with the result. A failed write rolls the local copy
    /// back and surfaces the error.
    pub async fn add_comment(&self, activity_id: &str, text: &str, user: &User) -> Result<Activity> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::InvalidInput("comment text is empty".to_string()));
        }
        let comment = Comment {
            id: None,
            text: text.to_string(),
            author: user.author(),
            created_at: Utc::now(),
            edited_at: None,
        };
        self.mutate_comments(activity_id, move |comments| {
            comments.insert(0, comment.clone());
            Ok(())
        })
        .await
    }

    /// Edits a comment in place, setting its edited timestamp. Only the
    /// comment's author may edit it.
    pub async fn edit_comment(
        &self,
        activity_id: &str,
        comment_ref: CommentRef,
        new_text: &str,
        user: &User,
    ) -> Result<Activity> {
        let new_text = new_text.trim().to_string();
        if new_text.is_empty() {
            return Err(HuddleError::InvalidInput("comment text is empty".to_string()));
        }
        let user_id = user.id.clone();
        self.mutate_comments(activity_id, move |comments| {
            let at = find_comment(comments, &comment_ref)
                .ok_or_else(|| HuddleError::NotFound("comment not found".to_string()))?;
            if comments[at].author.id != user_id {
                return Err(HuddleError::PermissionDenied(
                    "only the comment's author may edit it".to_string(),
                ));
            }
            comments[at].text = new_text.clone();
            comments[at].edited_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Deletes a comment. Allowed for the comment's author and for team
    /// owners.
    pub async fn delete_comment(
        &self,
        activity_id: &str,
        comment_ref: CommentRef,
        user: &User,
        role: TeamRole,
    ) -> Result<Activity> {
        let user_id = user.id.clone();
        self.mutate_comments(activity_id, move |comments| {
            let at = find_comment(comments, &comment_ref)
                .ok_or_else(|| HuddleError::NotFound("comment not found".to_string()))?;
            if comments[at].author.id != user_id && role != TeamRole::Owner {
                return Err(HuddleError::PermissionDenied(
                    "only the author or a team owner may delete a comment".to_string(),
                ));
            }
            comments.remove(at);
            Ok(())
        })
        .await
    }

    /// Read-modify-write over an activity's persisted comment list, with an
    /// optimistic local application first and rollback on failure.
    async fn mutate_comments<F>(&self, activity_id: &str, mutate: F) -> Result<Activity>
    where
        F: Fn(&mut Vec<Comment>) -> Result<()> + Clone,
    {
        let snapshot = self.feed.activity(activity_id);
        if let Some(mut optimistic) = snapshot.clone() {
            // Failures of the optimistic pass surface in the persisted pass.
            if mutate(&mut optimistic.comments).is_ok() {
                self.feed.apply_local_activity(optimistic);
            }
        }

        let result = async {
            let doc = self
                .gateway
                .get_document(&self.config.activities_collection, activity_id)
                .await?;
            let mut persisted = codec::activity_from_document(&doc).comments;
            mutate(&mut persisted)?;
            let doc = self
                .gateway
                .update_document(
                    &self.config.activities_collection,
                    activity_id,
                    json!({ "comments": codec::encode_comments(&persisted)? }),
                )
                .await?;
            Ok(codec::activity_from_document(&doc))
        }
        .await;

        match result {
            Ok(updated) => {
                self.feed.apply_local_activity(updated.clone());
                Ok(updated)
            }
            Err(e) => {
                if let Some(snapshot) = snapshot {
                    self.feed.apply_local_activity(snapshot);
                }
                Err(e)
            }
        }
    }

    /// Records a vote. Rejected without any state change when the user
    /// already appears in any option's persisted vote set; the latest
    /// persisted state is the authority, not the local optimistic copy.
    pub async fn vote(
        &self,
        activity_id: &str,
        option_index: usize,
        user_id: &str,
    ) -> Result<VoteOutcome> {
        let doc = self
            .gateway
            .get_document(&self.config.activities_collection, activity_id)
            .await?;
        let mut options = codec::activity_from_document(&doc).poll_options;
        if options
            .iter()
            .any(|option| option.votes.iter().any(|id| id == user_id))
        {
            return Ok(VoteOutcome::AlreadyVoted);
        }
        let option = options
            .get_mut(option_index)
            .ok_or_else(|| HuddleError::NotFound("poll option not found".to_string()))?;
        option.votes.insert(0, user_id.to_string());
        let doc = self
            .gateway
            .update_document(
                &self.config.activities_collection,
                activity_id,
                json!({ "pollOptions": codec::encode_poll_options(&options)? }),
            )
            .await?;
        self.feed
            .apply_local_activity(codec::activity_from_document(&doc));
        Ok(VoteOutcome::Recorded)
    }

    /// Deletes an activity and, best-effort, its backing stored file. The
    /// file id comes from the document when present, otherwise from its
    /// link URLs.
    pub async fn delete_activity(
        &self,
        activity: &Activity,
        user: &User,
        role: TeamRole,
    ) -> Result<()> {
        if activity.created_by.id != user.id && role != TeamRole::Owner {
            return Err(HuddleError::PermissionDenied(
                "only the author or a team owner may delete an activity".to_string(),
            ));
        }
        let file_id = if !activity.file_id.is_empty() {
            Some(activity.file_id.clone())
        } else {
            file_id_from_view_url(&activity.file_url)
                .or_else(|| file_id_from_view_url(&activity.links))
        };
        if let Some(file_id) = file_id {
            let bucket = bucket_from_view_url(&activity.file_url)
                .or_else(|| bucket_from_view_url(&activity.links))
                .unwrap_or_else(|| self.config.storage_bucket.clone());
            if let Err(e) = self.gateway.delete_file(&bucket, &file_id).await {
                tracing::warn!(
                    target: "huddle::activities",
                    "Failed to delete backing file {} for activity {}: {}",
                    file_id,
                    activity.id,
                    e
                );
            }
        }
        self.gateway
            .delete_document(&self.config.activities_collection, &activity.id)
            .await?;
        self.feed.remove_activity(&activity.id);
        Ok(())
    }
}

impl User {
    pub(crate) fn author(&self) -> crate::types::Author {
        crate::types::Author {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}
