//! Console event bus
//!
//! Backend state changes are pushed to the UI shell as `ConsoleEvent`s
//! over a broadcast channel. The shell subscribes at startup; events
//! emitted with no live subscriber are dropped (not cached), because
//! the shell re-reads snapshots from the owning managers when it mounts.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::probe::HostStatus;
use crate::terminal::BridgeState;

/// Notification severity, mirrored by the shell's toast styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Events published by the console core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleEvent {
    /// Human-readable notification with severity.
    Notice { severity: Severity, message: String },

    /// Ephemeral per-host probe verdict changed.
    HostStatus { host_id: i64, status: HostStatus },

    /// Terminal bridge lifecycle transition.
    TerminalState {
        session_id: String,
        state: BridgeState,
        detail: Option<String>,
    },

    /// Byte-level upload progress for a tracked transfer.
    UploadProgress {
        transfer_id: String,
        loaded: u64,
        total: u64,
    },

    /// Upload finished (success or failure); the indicator is dismissed
    /// on success and kept with the error otherwise.
    UploadFinished {
        transfer_id: String,
        error: Option<String>,
    },

    /// Credentials were rejected or expired; the shell must return to
    /// the login page.
    ReLoginRequired,

    /// Authentication session changed (login, logout, expiry sweep).
    AuthChanged { authenticated: bool },
}

/// Broadcast fan-out for console events.
///
/// Cloned into every manager that needs to publish. Capacity is bounded;
/// a slow subscriber lags rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: ConsoleEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped: no subscribers");
        }
    }

    /// Convenience for `ConsoleEvent::Notice`.
    pub fn notify(&self, severity: Severity, message: impl Into<String>) {
        self.emit(ConsoleEvent::Notice {
            severity,
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
