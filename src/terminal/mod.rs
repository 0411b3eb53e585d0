//! Terminal session bridge
//!
//! A token-gated duplex channel between the shell's terminal widget and
//! a host's remote shell. Every connection walks the same lifecycle:
//!
//! ```text
//! Idle -> TokenPending -> Connecting -> Connected -> { Closed, Error }
//! ```
//!
//! Closed and Error re-enter TokenPending through exactly two named
//! transitions: `restart_after_policy_violation` (automatic, when the
//! server closes with code 1008 because the single-use token went
//! stale) and `manual_reconnect` (user action, closes any live
//! transport first).

mod bridge;

pub use bridge::{TerminalBridge, TerminalOutput};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::{ConsoleError, Result};
use crate::events::EventBus;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BridgeState {
    /// No transport, nothing requested
    Idle = 0,
    /// Fetching the single-use connection token
    TokenPending = 1,
    /// Token in hand, opening the socket
    Connecting = 2,
    /// Duplex channel live
    Connected = 3,
    /// Transport ended cleanly
    Closed = 4,
    /// Token fetch or transport failed
    Error = 5,
}

impl BridgeState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::TokenPending,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Closed,
            5 => Self::Error,
            _ => Self::Idle,
        }
    }
}

/// Tracks the atomic lifecycle state shared between the public handle
/// and the connection task.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(BridgeState::Idle as u8))
    }

    pub(crate) fn get(&self) -> BridgeState {
        BridgeState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: BridgeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Source of single-use connection tokens.
///
/// The production impl asks the backend; tests substitute a stub.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, host_id: i64) -> Result<String>;
}

#[async_trait]
impl TokenSource for ApiClient {
    async fn token(&self, host_id: i64) -> Result<String> {
        self.ws_token(host_id).await
    }
}

/// Outbound control frames on the terminal socket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum OutboundFrame<'a> {
    Input { data: &'a str },
    Resize { data: Dimensions },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Registry of live terminal bridges, keyed by session id.
pub struct TerminalManager {
    api: Arc<ApiClient>,
    events: EventBus,
    sessions: DashMap<String, Arc<TerminalBridge>>,
}

impl TerminalManager {
    pub fn new(api: Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            events,
            sessions: DashMap::new(),
        }
    }

    /// Open a bridge for a host and start connecting. Remote output and
    /// local banners arrive on the returned receiver.
    pub fn open(
        &self,
        host_id: i64,
    ) -> (Arc<TerminalBridge>, mpsc::Receiver<TerminalOutput>) {
        let session_id = Uuid::new_v4().to_string();
        let ws_base = self.api.config().ws_base();
        let (output_tx, output_rx) = mpsc::channel(256);

        let bridge = Arc::new(TerminalBridge::new(
            session_id.clone(),
            host_id,
            ws_base,
            self.api.clone() as Arc<dyn TokenSource>,
            self.events.clone(),
            output_tx,
        ));
        self.sessions.insert(session_id.clone(), bridge.clone());
        info!("terminal session {} opened for host {}", session_id, host_id);

        bridge.clone().start();
        (bridge, output_rx)
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<TerminalBridge>> {
        self.sessions
            .get(session_id)
            .map(|b| b.clone())
            .ok_or_else(|| ConsoleError::SessionNotFound(session_id.to_string()))
    }

    /// Tear a session down and drop it from the registry. Safe on every
    /// exit path, including sessions that never connected.
    pub async fn close(&self, session_id: &str) {
        if let Some((_, bridge)) = self.sessions.remove(session_id) {
            bridge.close().await;
            info!("terminal session {} closed", session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u8_roundtrip() {
        for state in [
            BridgeState::Idle,
            BridgeState::TokenPending,
            BridgeState::Connecting,
            BridgeState::Connected,
            BridgeState::Closed,
            BridgeState::Error,
        ] {
            assert_eq!(BridgeState::from_u8(state as u8), state);
        }
        // Unknown values fall back to Idle
        assert_eq!(BridgeState::from_u8(99), BridgeState::Idle);
    }

    #[test]
    fn test_outbound_frame_wire_shape() {
        let frame = OutboundFrame::Input { data: "ls\r" };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"input","data":"ls\r"}"#
        );

        let frame = OutboundFrame::Resize {
            data: Dimensions { cols: 120, rows: 40 },
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"resize","data":{"cols":120,"rows":40}}"#
        );
    }
}
