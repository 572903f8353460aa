use thiserror::Error;

pub type Result<T> = core::result::Result<T, HuddleError>;

#[derive(Error, Debug)]
pub enum HuddleError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    NetworkTransient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("An account with this email already exists")]
    EmailExists,

    #[error("Password must be at least 8 characters")]
    WeakPassword,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A like toggle for this activity is already in flight")]
    LikeInFlight,

    #[error("Gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Service error: {0}")]
    Service(String),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for HuddleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            HuddleError::NetworkTransient(err.to_string())
        } else {
            HuddleError::Other(anyhow::anyhow!(err))
        }
    }
}

impl HuddleError {
    /// True for failures worth retrying at the session gate.
    pub fn is_transient(&self) -> bool {
        matches!(self, HuddleError::NetworkTransient(_))
    }
}
