//! Session/identity gate: resolves the current user, bounded retry on
//! transient network failure, and the account flows around it.

use std::time::Duration;

use crate::Huddle;
use crate::error::{HuddleError, Result};
use crate::types::User;
use tokio::sync::watch;

/// How many retries follow a transient failure of the who-am-I call. The
/// first attempt is uncounted.
const RESOLVE_RETRIES: u32 = 3;
/// Fixed delay between attempts. Deliberately not exponential.
const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    SignedOut,
    Resolving,
    /// Mid retry loop; `attempt` counts retries, starting at 1.
    Reconnecting {
        attempt: u32,
    },
    Active,
}

impl Huddle {
    /// Resolves the current user's identity.
    ///
    /// `NotAuthenticated` is terminal: the caller redirects to sign-in, no
    /// retry. A transient network failure is retried up to 3 times with a
    /// fixed 2-second delay, with a `Reconnecting` status surfaced while the
    /// loop runs.
    pub async fn resolve_user(&self) -> Result<User> {
        self.resolve_user_with_delay(RESOLVE_RETRY_DELAY).await
    }

    pub(crate) async fn resolve_user_with_delay(&self, delay: Duration) -> Result<User> {
        let _ = self.session_status.send(SessionStatus::Resolving);
        let mut attempt: u32 = 0;
        loop {
            match self.gateway.current_user().await {
                Ok(user) => {
                    let _ = self.session_status.send(SessionStatus::Active);
                    return Ok(user);
                }
                Err(e) if e.is_transient() && attempt < RESOLVE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        target: "huddle::session",
                        "Transient failure resolving identity (retry {}/{}): {}",
                        attempt,
                        RESOLVE_RETRIES,
                        e
                    );
                    let _ = self
                        .session_status
                        .send(SessionStatus::Reconnecting { attempt });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let _ = self.session_status.send(SessionStatus::SignedOut);
                    return Err(e);
                }
            }
        }
    }

    /// Creates an account and signs the new user in.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User> {
        if password.len() < 8 {
            return Err(HuddleError::WeakPassword);
        }
        let user = self
            .gateway
            .create_account(email, password, name)
            .await
            .map_err(map_account_error)?;
        self.gateway
            .create_session(email, password)
            .await
            .map_err(map_sign_in_error)?;
        let _ = self.session_status.send(SessionStatus::Active);
        Ok(user)
    }

    /// Signs in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        self.gateway
            .create_session(email, password)
            .await
            .map_err(map_sign_in_error)?;
        let user = self.gateway.current_user().await?;
        let _ = self.session_status.send(SessionStatus::Active);
        Ok(user)
    }

    /// Create-then-sign-in. Falls through to a plain sign-in when the
    /// account already exists.
    pub async fn fast_login(&self, email: &str, password: &str, name: Option<&str>) -> Result<User> {
        match self.create_account(email, password, name).await {
            Ok(user) => Ok(user),
            Err(HuddleError::EmailExists) => self.sign_in(email, password).await,
            Err(e) => Err(e),
        }
    }

    /// Ends the session. Local state is cleared even when the remote call
    /// fails; that failure is logged and swallowed.
    pub async fn sign_out(&self) {
        self.abort_pumps();
        self.feed.reset();
        let _ = self.session_status.send(SessionStatus::SignedOut);
        if let Err(e) = self.gateway.delete_session().await {
            tracing::warn!(target: "huddle::session", "Failed to delete remote session: {}", e);
        }
    }

    /// Stores arbitrary key-value preferences on the current user.
    pub async fn update_user_prefs(
        &self,
        prefs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<User> {
        self.gateway.update_user_prefs(prefs).await
    }

    pub fn session_status(&self) -> watch::Receiver<SessionStatus> {
        self.session_status.subscribe()
    }
}

fn map_account_error(err: HuddleError) -> HuddleError {
    match err {
        HuddleError::Conflict(_) => HuddleError::EmailExists,
        HuddleError::Gateway { status: 400, message } => {
            let lowered = message.to_lowercase();
            if lowered.contains("password") {
                HuddleError::WeakPassword
            } else if lowered.contains("email") {
                HuddleError::InvalidEmail
            } else {
                HuddleError::Gateway { status: 400, message }
            }
        }
        other => other,
    }
}

fn map_sign_in_error(err: HuddleError) -> HuddleError {
    match err {
        HuddleError::NotAuthenticated => HuddleError::InvalidCredentials,
        HuddleError::Gateway { status: 400 | 401, .. } => HuddleError::InvalidCredentials,
        other => other,
    }
}
