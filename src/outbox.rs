//! Owner-only team email: compose-and-send through the email collaborator,
//! a best-effort history record in the outbox collection, and the built-in
//! compose templates.

use serde_json::json;
use uuid::Uuid;

use crate::Huddle;
use crate::error::{HuddleError, Result};
use crate::gateway::{DocumentQuery, Permission, codec};
use crate::types::{OutboxRecord, TeamRole, User};

/// Most recent sends shown in the history tab.
pub const OUTBOX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxTemplate {
    pub title: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

pub const OUTBOX_TEMPLATES: [OutboxTemplate; 3] = [
    OutboxTemplate {
        title: "Weekly Update",
        subject: "Weekly Team Update",
        body: "Hi team,\n\nHere are the updates for this week:\n- Item 1\n- Item 2\n\nBest,\n{{your_name}}",
    },
    OutboxTemplate {
        title: "Meeting Reminder",
        subject: "Reminder: Team Meeting",
        body: "Hello,\n\nThis is a reminder for our team meeting on {{date}} at {{time}}. Agenda:\n- Topic A\n- Topic B\n\nSee you there!",
    },
    OutboxTemplate {
        title: "Announcement",
        subject: "Important Announcement",
        body: "Hi everyone,\n\nWe have an important announcement:\n\n{{announcement_text}}\n\nThanks.",
    },
];

impl Huddle {
    /// Sends a team email, then records the send in the outbox collection.
    /// The send is the operation; a failure writing the history record is
    /// logged and does not fail the call.
    pub async fn send_team_email(
        &self,
        team_id: &str,
        subject: &str,
        body: &str,
        recipients: &[String],
        user: &User,
        role: TeamRole,
    ) -> Result<()> {
        if role != TeamRole::Owner {
            return Err(HuddleError::PermissionDenied(
                "only a team owner may use the outbox".to_string(),
            ));
        }
        let subject = subject.trim();
        if subject.is_empty() || body.trim().is_empty() {
            return Err(HuddleError::InvalidInput(
                "subject and body are required".to_string(),
            ));
        }
        if recipients.is_empty() {
            return Err(HuddleError::InvalidInput("no recipients".to_string()));
        }
        let from = if user.email.is_empty() {
            "no-reply@example.com"
        } else {
            user.email.as_str()
        };
        self.send_service_email(from, recipients, subject, body)
            .await?;

        let record = self
            .gateway
            .create_document(
                &self.config.outbox_collection,
                &Uuid::new_v4().to_string(),
                json!({
                    "teamId": team_id,
                    "subject": subject,
                    "body": body,
                    "recipients": recipients,
                    "createdById": user.id,
                    "createdByName": user.name,
                    "createdByEmail": user.email,
                }),
                &Permission::team_grants(team_id),
            )
            .await;
        if let Err(e) = record {
            tracing::warn!(
                target: "huddle::outbox",
                "Email sent but history record failed for team {}: {}",
                team_id,
                e
            );
        }
        Ok(())
    }

    /// The latest sends for a team, newest first.
    pub async fn outbox_history(&self, team_id: &str) -> Result<Vec<OutboxRecord>> {
        let query = DocumentQuery::new()
            .equal("teamId", team_id)
            .order_desc_created()
            .limit(OUTBOX_HISTORY_LIMIT);
        let docs = self
            .gateway
            .list_documents(&self.config.outbox_collection, query)
            .await?;
        Ok(docs.iter().map(codec::outbox_from_document).collect())
    }
}
