//! OpsDeck - client core for a multi-host operator console
//!
//! Owns the protocol and state-machine logic between UI intent and the
//! fleet backend: operation fan-out, the token-gated terminal bridge,
//! remote file sessions, and the health prober. A thin UI shell
//! subscribes to the event bus and calls into the managers here.

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod files;
pub mod hosts;
pub mod probe;
pub mod terminal;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::ApiClient;
use auth::AuthManager;
use config::ConsoleConfig;
use dispatch::Dispatcher;
use error::Result;
use events::EventBus;
use files::FileSession;
use probe::HealthProber;
use terminal::TerminalManager;

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Top-level console handle wiring the managers together.
pub struct Console {
    pub events: EventBus,
    pub auth: Arc<AuthManager>,
    pub api: Arc<ApiClient>,
    pub dispatcher: Dispatcher,
    pub prober: HealthProber,
    pub terminals: TerminalManager,
    config: ConsoleConfig,
}

impl Console {
    /// Build a console against the given backend config. Restores any
    /// persisted auth session and starts the expiry sweeper.
    pub async fn connect(config: ConsoleConfig) -> Result<Self> {
        let events = EventBus::new();
        let auth = Arc::new(AuthManager::new(events.clone())?);
        auth.restore().await?;
        let _sweeper = auth.spawn_sweeper();

        let api = Arc::new(ApiClient::new(config.clone(), auth.clone())?);
        let dispatcher = Dispatcher::new(api.clone(), events.clone());
        let prober = HealthProber::new(api.clone(), events.clone());
        let terminals = TerminalManager::new(api.clone(), events.clone());

        Ok(Self {
            events,
            auth,
            api,
            dispatcher,
            prober,
            terminals,
            config,
        })
    }

    /// Open a remote file session for one host.
    pub fn file_session(&self, host_id: i64) -> FileSession {
        FileSession::new(
            self.api.clone(),
            self.events.clone(),
            host_id,
            self.config.file_session_debounce_ms,
        )
    }
}
