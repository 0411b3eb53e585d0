//! Terminal bridge transport
//!
//! One bridge owns at most one live WebSocket at a time. A background
//! task walks the lifecycle: fetch a single-use token, dial the
//! per-host endpoint with the token as a query parameter, then pump
//! frames until the transport ends. A policy-violation close (1008)
//! means the token went stale, so the task automatically loops back to
//! token acquisition; everything else settles in Closed or Error.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ConsoleError;
use crate::events::{ConsoleEvent, EventBus};

use super::{BridgeState, Dimensions, OutboundFrame, StateCell, TokenSource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the shell's terminal widget receives from the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutput {
    /// Raw remote output, written straight to the widget
    Data(Bytes),
    /// Local status line (never came from the wire)
    Banner(String),
    /// Error frame relayed by the backend
    Error(String),
}

/// Why a pump loop ended.
enum ExitReason {
    /// Local close request
    Shutdown,
    /// Server closed the socket normally
    ServerClosed,
    /// Server closed with 1008: stale token, restart from token fetch
    PolicyViolation,
    Transport(String),
}

pub struct TerminalBridge {
    session_id: String,
    host_id: i64,
    ws_base: String,
    token_source: Arc<dyn TokenSource>,
    events: EventBus,
    state: StateCell,
    running: AtomicBool,
    /// Present only while Connected; input is dropped, never queued,
    /// in every other state.
    input_tx: RwLock<Option<mpsc::Sender<String>>>,
    /// Latest terminal dimensions; the pump samples this, so resize
    /// bursts collapse to one frame per writer wakeup.
    dims_tx: watch::Sender<Dimensions>,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
    output_tx: mpsc::Sender<TerminalOutput>,
}

impl TerminalBridge {
    /// Build a bridge against an explicit token source and endpoint
    /// base. [`super::TerminalManager::open`] is the usual entry point.
    pub fn new(
        session_id: String,
        host_id: i64,
        ws_base: String,
        token_source: Arc<dyn TokenSource>,
        events: EventBus,
        output_tx: mpsc::Sender<TerminalOutput>,
    ) -> Self {
        let (dims_tx, _) = watch::channel(Dimensions::default());
        Self {
            session_id,
            host_id,
            ws_base,
            token_source,
            events,
            state: StateCell::new(),
            running: AtomicBool::new(false),
            input_tx: RwLock::new(None),
            dims_tx,
            shutdown_tx: RwLock::new(None),
            output_tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn host_id(&self) -> i64 {
        self.host_id
    }

    pub fn state(&self) -> BridgeState {
        self.state.get()
    }

    pub fn dimensions(&self) -> Dimensions {
        *self.dims_tx.borrow()
    }

    fn endpoint(&self, token: &str) -> String {
        format!(
            "{}/ws/terminal/{}?token={}",
            self.ws_base, self.host_id, token
        )
    }

    fn transition(&self, state: BridgeState, detail: Option<String>) {
        self.state.set(state);
        self.events.emit(ConsoleEvent::TerminalState {
            session_id: self.session_id.clone(),
            state,
            detail,
        });
    }

    /// Feed one keystroke chunk. Dropped unless the channel is live.
    pub fn send_input(&self, data: &str) {
        if self.state.get() != BridgeState::Connected {
            debug!("input dropped, bridge not connected");
            return;
        }
        let guard = self.input_tx.read();
        if let Some(ref tx) = *guard {
            if tx.try_send(data.to_string()).is_err() {
                warn!("input dropped, channel full or closing");
            }
        }
    }

    /// Record new terminal dimensions. The live pump, if any, picks the
    /// latest value up on its next wakeup.
    pub fn resize(&self, cols: u16, rows: u16) {
        self.dims_tx.send_replace(Dimensions { cols, rows });
    }

    /// Launch the connection task. No-op if one is already running.
    pub fn start(self: Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("bridge {} already running", self.session_id);
            return;
        }
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.write() = Some(shutdown_tx);
        tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
    }

    /// Close the transport and settle in Closed. Idempotent.
    pub async fn close(&self) {
        let tx = self.shutdown_tx.write().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// User-requested reconnect: tears any live transport down first,
    /// then walks the lifecycle again from token acquisition.
    pub async fn manual_reconnect(self: &Arc<Self>) {
        info!("bridge {}: manual reconnect", self.session_id);
        self.close().await;
        // Wait for the old task to release the running flag
        while self.running.load(Ordering::Acquire) {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.clone().start();
    }

    /// Automatic re-entry into token acquisition after the server
    /// rejected the stale token with close code 1008.
    fn restart_after_policy_violation(&self) {
        info!(
            "bridge {}: token rejected (1008), fetching a fresh one",
            self.session_id
        );
        self.transition(BridgeState::TokenPending, Some("token expired".to_string()));
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        loop {
            self.transition(BridgeState::TokenPending, None);

            let token = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.transition(BridgeState::Closed, None);
                    break;
                }
                result = self.token_source.token(self.host_id) => match result {
                    Ok(token) => token,
                    Err(ConsoleError::Unauthorized) => {
                        // Re-login event already emitted; no retry here
                        self.transition(
                            BridgeState::Error,
                            Some("not authenticated".to_string()),
                        );
                        break;
                    }
                    Err(e) => {
                        self.transition(BridgeState::Error, Some(e.to_string()));
                        break;
                    }
                },
            };

            self.transition(BridgeState::Connecting, None);
            let url = self.endpoint(&token);

            let ws = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.transition(BridgeState::Closed, None);
                    break;
                }
                result = connect_async(url.as_str()) => match result {
                    Ok((ws, _)) => ws,
                    Err(e) => {
                        self.transition(BridgeState::Error, Some(e.to_string()));
                        break;
                    }
                },
            };

            let (input_tx, input_rx) = mpsc::channel::<String>(256);
            *self.input_tx.write() = Some(input_tx);
            self.transition(BridgeState::Connected, None);
            let _ = self
                .output_tx
                .send(TerminalOutput::Banner(format!(
                    "\r\n*** connected to host {} ***\r\n",
                    self.host_id
                )))
                .await;

            let reason = self.pump(ws, input_rx, &mut shutdown_rx).await;

            // Input must never outlive the connection it was typed into
            *self.input_tx.write() = None;

            match reason {
                ExitReason::PolicyViolation => {
                    self.restart_after_policy_violation();
                    continue;
                }
                ExitReason::Shutdown | ExitReason::ServerClosed => {
                    self.transition(BridgeState::Closed, None);
                    break;
                }
                ExitReason::Transport(e) => {
                    self.transition(BridgeState::Error, Some(e));
                    break;
                }
            }
        }

        *self.shutdown_tx.write() = None;
        self.running.store(false, Ordering::Release);
    }

    /// Pump frames until the transport ends. Owns the socket; outbound
    /// frames exist only inside this function, so nothing is ever sent
    /// outside the Connected state.
    async fn pump(
        &self,
        ws: WsStream,
        mut input_rx: mpsc::Receiver<String>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> ExitReason {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut dims_rx = self.dims_tx.subscribe();

        // Refit: one resize frame with the current dimensions
        let initial = *dims_rx.borrow_and_update();
        if let Err(e) = Self::send_frame(&mut ws_tx, &OutboundFrame::Resize { data: initial }).await
        {
            return ExitReason::Transport(e);
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return ExitReason::Shutdown;
                }
                message = ws_rx.next() => match message {
                    Some(Ok(Message::Text(text))) => self.deliver_text(text).await,
                    Some(Ok(Message::Binary(data))) => {
                        let _ = self
                            .output_tx
                            .send(TerminalOutput::Data(Bytes::from(data)))
                            .await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            return ExitReason::Transport("pong failed".to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            if frame.code == CloseCode::Policy {
                                return ExitReason::PolicyViolation;
                            }
                        }
                        return ExitReason::ServerClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return ExitReason::Transport(e.to_string()),
                    None => return ExitReason::ServerClosed,
                },
                input = input_rx.recv() => {
                    let Some(data) = input else {
                        return ExitReason::Shutdown;
                    };
                    let frame = OutboundFrame::Input { data: &data };
                    if let Err(e) = Self::send_frame(&mut ws_tx, &frame).await {
                        return ExitReason::Transport(e);
                    }
                }
                changed = dims_rx.changed() => {
                    if changed.is_err() {
                        return ExitReason::Shutdown;
                    }
                    let dims = *dims_rx.borrow_and_update();
                    let frame = OutboundFrame::Resize { data: dims };
                    if let Err(e) = Self::send_frame(&mut ws_tx, &frame).await {
                        return ExitReason::Transport(e);
                    }
                }
            }
        }
    }

    /// Inbound text is raw terminal output unless it parses as an
    /// `{error}` frame.
    async fn deliver_text(&self, text: String) {
        #[derive(serde::Deserialize)]
        struct ErrorFrame {
            error: String,
        }
        if text.starts_with('{') {
            if let Ok(frame) = serde_json::from_str::<ErrorFrame>(&text) {
                let _ = self.output_tx.send(TerminalOutput::Error(frame.error)).await;
                return;
            }
        }
        let _ = self
            .output_tx
            .send(TerminalOutput::Data(Bytes::from(text.into_bytes())))
            .await;
    }

    async fn send_frame(
        ws_tx: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        frame: &OutboundFrame<'_>,
    ) -> Result<(), String> {
        let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
        ws_tx
            .send(Message::Text(json))
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticToken;

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn token(&self, _host_id: i64) -> crate::error::Result<String> {
            Ok("tok".to_string())
        }
    }

    fn bridge() -> (Arc<TerminalBridge>, mpsc::Receiver<TerminalOutput>) {
        let (output_tx, output_rx) = mpsc::channel(16);
        let bridge = Arc::new(TerminalBridge::new(
            "sess-1".to_string(),
            7,
            "ws://127.0.0.1:1".to_string(),
            Arc::new(StaticToken),
            EventBus::new(),
            output_tx,
        ));
        (bridge, output_rx)
    }

    #[test]
    fn test_endpoint_carries_token_query() {
        let (bridge, _rx) = bridge();
        assert_eq!(
            bridge.endpoint("abc123"),
            "ws://127.0.0.1:1/ws/terminal/7?token=abc123"
        );
    }

    #[test]
    fn test_input_dropped_when_not_connected() {
        let (bridge, _rx) = bridge();
        assert_eq!(bridge.state(), BridgeState::Idle);
        // Must not panic or queue anything
        bridge.send_input("echo hi\r");
        assert!(bridge.input_tx.read().is_none());
    }

    #[test]
    fn test_resize_records_latest_dimensions() {
        let (bridge, _rx) = bridge();
        bridge.resize(100, 30);
        bridge.resize(132, 43);
        assert_eq!(bridge.dimensions(), Dimensions { cols: 132, rows: 43 });
    }

    #[tokio::test]
    async fn test_resize_burst_coalesces_to_latest() {
        let (bridge, _rx) = bridge();
        let mut dims_rx = bridge.dims_tx.subscribe();
        dims_rx.borrow_and_update();

        for cols in [81, 82, 83, 84, 85] {
            bridge.resize(cols, 24);
        }

        // A single wakeup observes only the final value
        assert!(dims_rx.has_changed().unwrap());
        let dims = *dims_rx.borrow_and_update();
        assert_eq!(dims.cols, 85);
        assert!(!dims_rx.has_changed().unwrap());
    }
}
