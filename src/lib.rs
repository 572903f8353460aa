pub use crate::error::{HuddleError, Result};
pub use crate::feed::FeedReconciler;
pub use crate::gateway::{Gateway, HttpGateway};
pub use crate::session::SessionStatus;
pub use crate::types::*;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub mod activities;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod outbox;
pub mod services;
pub mod session;
pub mod teams;
pub mod types;

#[cfg(test)]
pub mod test_utils;

static TRACING_GUARDS: OnceCell<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceCell::new();
static TRACING_INIT: OnceCell<()> = OnceCell::new();

fn init_tracing(logs_dir: &Path) {
    TRACING_INIT.get_or_init(|| {
        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("huddle")
            .filename_suffix("log")
            .build(logs_dir)
            .expect("Failed to create file appender");

        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

        TRACING_GUARDS
            .set(Mutex::new(Some((file_guard, stdout_guard))))
            .ok();

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_layer = Layer::new()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .init();
    });
}

const PLACEHOLDER_PROJECT_ID: &str = "your-project-id";

#[derive(Clone, Debug)]
pub struct HuddleConfig {
    /// Gateway REST base URL.
    pub endpoint: String,
    /// Gateway project identifier.
    pub project_id: String,
    pub database_id: String,
    pub activities_collection: String,
    pub messages_collection: String,
    pub outbox_collection: String,
    pub storage_bucket: String,
    /// Server-side function handling join-by-code.
    pub join_function_id: String,
    pub audio_service_url: Option<String>,
    pub summary_service_url: Option<String>,
    pub email_service_url: Option<String>,
    /// Directory for application logs.
    pub logs_dir: PathBuf,
}

impl HuddleConfig {
    /// Reads configuration from `HUDDLE_*` environment variables. The three
    /// collaborator service URLs are optional; everything else is surfaced
    /// as missing when the action needing it runs through [`validate`].
    ///
    /// [`validate`]: HuddleConfig::validate
    pub fn from_env(logs_dir: &Path) -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };
        Self {
            endpoint: var("HUDDLE_ENDPOINT"),
            project_id: var("HUDDLE_PROJECT_ID"),
            database_id: var("HUDDLE_DATABASE_ID"),
            activities_collection: var("HUDDLE_ACTIVITIES_COLLECTION"),
            messages_collection: var("HUDDLE_MESSAGES_COLLECTION"),
            outbox_collection: var("HUDDLE_OUTBOX_COLLECTION"),
            storage_bucket: var("HUDDLE_STORAGE_BUCKET"),
            join_function_id: var("HUDDLE_JOIN_FUNCTION_ID"),
            audio_service_url: optional("HUDDLE_AUDIO_SERVICE_URL"),
            summary_service_url: optional("HUDDLE_SUMMARY_SERVICE_URL"),
            email_service_url: optional("HUDDLE_EMAIL_SERVICE_URL"),
            logs_dir: logs_dir.join(env_suffix),
        }
    }

    /// Rejects a configuration that cannot talk to the gateway at all:
    /// missing endpoint or project id, or the placeholder project id shipped
    /// in the environment template.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(HuddleError::Configuration(
                "gateway endpoint is not set".to_string(),
            ));
        }
        if self.project_id.trim().is_empty() || self.project_id == PLACEHOLDER_PROJECT_ID {
            return Err(HuddleError::Configuration(
                "gateway project id is not set".to_string(),
            ));
        }
        if self.database_id.trim().is_empty() {
            return Err(HuddleError::Configuration(
                "database id is not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// The application handle: a validated configuration, an explicitly passed
/// gateway client, and the per-team feed state. All operations hang off this
/// struct; there is no global instance.
pub struct Huddle {
    pub config: HuddleConfig,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) feed: Arc<FeedReconciler>,
    pub(crate) session_status: watch::Sender<SessionStatus>,
    /// Single-flight guard for like toggles, keyed `{activity_id}:{user_id}`.
    pub(crate) like_guards: DashMap<String, ()>,
    pub(crate) pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Huddle {
    /// Initializes the application with the provided configuration and
    /// gateway handle.
    ///
    /// Sets up logging in the configured logs directory and validates that
    /// the configuration can reach the gateway. Identity resolution, team
    /// selection and the realtime subscription all happen later, through
    /// their own operations.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Configuration`] when the endpoint, project id
    /// or database id is missing, and [`HuddleError::Filesystem`] when the
    /// logs directory cannot be created.
    pub fn initialize(config: HuddleConfig, gateway: Arc<dyn Gateway>) -> Result<Self> {
        std::fs::create_dir_all(&config.logs_dir)?;
        init_tracing(&config.logs_dir);
        tracing::debug!(target: "huddle", "Initializing with config: {:?}", config);
        config.validate()?;

        let (session_status, _) = watch::channel(SessionStatus::SignedOut);
        Ok(Self {
            config,
            gateway,
            feed: Arc::new(FeedReconciler::new()),
            session_status,
            like_guards: DashMap::new(),
            pumps: Mutex::new(Vec::new()),
        })
    }

    /// Convenience constructor wiring an [`HttpGateway`] from the
    /// configuration.
    pub fn connect(config: HuddleConfig) -> Result<Self> {
        config.validate()?;
        let gateway = Arc::new(HttpGateway::new(
            &config.endpoint,
            &config.project_id,
            &config.database_id,
        )?);
        Self::initialize(config, gateway)
    }

    pub fn feed(&self) -> &FeedReconciler {
        &self.feed
    }

    /// Read-only view of the per-team connection status.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.feed.connection_status()
    }

    pub(crate) fn abort_pumps(&self) {
        let mut pumps = self
            .pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for pump in pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for Huddle {
    fn drop(&mut self) {
        self.abort_pumps();
    }
}

impl std::fmt::Debug for Huddle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Huddle")
            .field("config", &self.config)
            .field("current_team", &self.feed.current_team())
            .finish_non_exhaustive()
    }
}
