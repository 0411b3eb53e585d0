//! Terminal bridge integration tests against an in-process WebSocket
//! server standing in for the backend's per-host terminal endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use opsdeck::error::{ConsoleError, Result};
use opsdeck::events::{ConsoleEvent, EventBus};
use opsdeck::terminal::{BridgeState, TerminalBridge, TerminalOutput, TokenSource};

const WAIT: Duration = Duration::from_secs(5);

/// Issues tok-1, tok-2, ... so tests can verify re-token behavior.
struct CountingTokens(AtomicU32);

#[async_trait]
impl TokenSource for CountingTokens {
    async fn token(&self, _host_id: i64) -> Result<String> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tok-{}", n))
    }
}

struct RejectingTokens(AtomicU32);

#[async_trait]
impl TokenSource for RejectingTokens {
    async fn token(&self, _host_id: i64) -> Result<String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(ConsoleError::Unauthorized)
    }
}

struct HangingTokens;

#[async_trait]
impl TokenSource for HangingTokens {
    async fn token(&self, _host_id: i64) -> Result<String> {
        std::future::pending().await
    }
}

async fn accept_with_uri(
    listener: &TcpListener,
    uri_tx: mpsc::Sender<String>,
) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let _ = uri_tx.try_send(req.uri().to_string());
        Ok(resp)
    })
    .await
    .unwrap()
}

fn spawn_bridge(
    port: u16,
    tokens: Arc<dyn TokenSource>,
) -> (
    Arc<TerminalBridge>,
    mpsc::Receiver<TerminalOutput>,
    tokio::sync::broadcast::Receiver<ConsoleEvent>,
) {
    let events = EventBus::new();
    let state_rx = events.subscribe();
    let (output_tx, output_rx) = mpsc::channel(64);
    let bridge = Arc::new(TerminalBridge::new(
        "test-session".to_string(),
        42,
        format!("ws://127.0.0.1:{}", port),
        tokens,
        events,
        output_tx,
    ));
    bridge.clone().start();
    (bridge, output_rx, state_rx)
}

async fn wait_for_state(
    rx: &mut tokio::sync::broadcast::Receiver<ConsoleEvent>,
    wanted: BridgeState,
) {
    timeout(WAIT, async {
        loop {
            if let ConsoleEvent::TerminalState { state, .. } = rx.recv().await.unwrap() {
                if state == wanted {
                    return;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", wanted));
}

#[tokio::test]
async fn first_outbound_frame_is_resize_then_io_flows() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, mut uri_rx) = mpsc::channel(4);
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(16);

    tokio::spawn(async move {
        let mut ws = accept_with_uri(&listener, uri_tx).await;

        // First frame from the client must be the initial resize
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            frame_tx.send(text).await.unwrap();
        }

        ws.send(Message::Text("host$ ".to_string())).await.unwrap();

        // Relay the keystroke frame back to the test
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            frame_tx.send(text).await.unwrap();
        }

        ws.send(Message::Close(None)).await.unwrap();
    });

    let (bridge, mut output_rx, mut state_rx) =
        spawn_bridge(port, Arc::new(CountingTokens(AtomicU32::new(0))));
    bridge.resize(120, 40);

    wait_for_state(&mut state_rx, BridgeState::Connected).await;

    let uri = timeout(WAIT, uri_rx.recv()).await.unwrap().unwrap();
    assert_eq!(uri, "/ws/terminal/42?token=tok-1");

    let first: serde_json::Value =
        serde_json::from_str(&timeout(WAIT, frame_rx.recv()).await.unwrap().unwrap()).unwrap();
    assert_eq!(first["type"], "resize");
    assert_eq!(first["data"]["cols"], 120);
    assert_eq!(first["data"]["rows"], 40);

    // Local banner first, then remote output verbatim
    let banner = timeout(WAIT, output_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(banner, TerminalOutput::Banner(_)));
    let data = timeout(WAIT, output_rx.recv()).await.unwrap().unwrap();
    assert_eq!(data, TerminalOutput::Data("host$ ".into()));

    bridge.send_input("ls\r");
    let keystroke: serde_json::Value =
        serde_json::from_str(&timeout(WAIT, frame_rx.recv()).await.unwrap().unwrap()).unwrap();
    assert_eq!(keystroke["type"], "input");
    assert_eq!(keystroke["data"], "ls\r");

    wait_for_state(&mut state_rx, BridgeState::Closed).await;
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn policy_violation_close_fetches_fresh_token_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, mut uri_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        // First connection: reject the token as stale
        let mut ws = accept_with_uri(&listener, uri_tx.clone()).await;
        let _ = ws.next().await; // initial resize
        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "token expired".into(),
        })))
        .await
        .unwrap();

        // Second connection: accept and hold open
        let mut ws = accept_with_uri(&listener, uri_tx).await;
        while ws.next().await.is_some() {}
    });

    let (bridge, _output_rx, mut state_rx) =
        spawn_bridge(port, Arc::new(CountingTokens(AtomicU32::new(0))));

    wait_for_state(&mut state_rx, BridgeState::Connected).await;
    let first_uri = timeout(WAIT, uri_rx.recv()).await.unwrap().unwrap();
    assert!(first_uri.ends_with("token=tok-1"));

    // The 1008 close must walk back through token acquisition on its own
    wait_for_state(&mut state_rx, BridgeState::TokenPending).await;
    wait_for_state(&mut state_rx, BridgeState::Connected).await;
    let second_uri = timeout(WAIT, uri_rx.recv()).await.unwrap().unwrap();
    assert!(second_uri.ends_with("token=tok-2"));

    bridge.close().await;
    wait_for_state(&mut state_rx, BridgeState::Closed).await;
}

#[tokio::test]
async fn unauthorized_token_fetch_settles_in_error_without_retry() {
    let tokens = Arc::new(RejectingTokens(AtomicU32::new(0)));
    let (bridge, _output_rx, mut state_rx) = spawn_bridge(1, tokens.clone());

    wait_for_state(&mut state_rx, BridgeState::Error).await;
    assert_eq!(bridge.state(), BridgeState::Error);

    // No automatic retry on auth failure
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tokens.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_while_token_pending_settles_in_closed() {
    let (bridge, _output_rx, mut state_rx) = spawn_bridge(1, Arc::new(HangingTokens));

    wait_for_state(&mut state_rx, BridgeState::TokenPending).await;
    bridge.close().await;
    wait_for_state(&mut state_rx, BridgeState::Closed).await;
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn manual_reconnect_restarts_from_token_acquisition() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, mut uri_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        // First connection ends normally
        let mut ws = accept_with_uri(&listener, uri_tx.clone()).await;
        let _ = ws.next().await;
        ws.send(Message::Close(None)).await.unwrap();

        // Reconnect lands here
        let mut ws = accept_with_uri(&listener, uri_tx).await;
        while ws.next().await.is_some() {}
    });

    let (bridge, _output_rx, mut state_rx) =
        spawn_bridge(port, Arc::new(CountingTokens(AtomicU32::new(0))));

    wait_for_state(&mut state_rx, BridgeState::Connected).await;
    let _ = timeout(WAIT, uri_rx.recv()).await.unwrap().unwrap();
    wait_for_state(&mut state_rx, BridgeState::Closed).await;

    bridge.manual_reconnect().await;
    wait_for_state(&mut state_rx, BridgeState::Connected).await;
    let uri = timeout(WAIT, uri_rx.recv()).await.unwrap().unwrap();
    assert!(uri.ends_with("token=tok-2"));

    bridge.close().await;
}

#[tokio::test]
async fn inbound_error_frame_is_surfaced_separately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, _uri_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        let mut ws = accept_with_uri(&listener, uri_tx).await;
        let _ = ws.next().await;
        ws.send(Message::Text(r#"{"error":"shell exited"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Close(None)).await.unwrap();
    });

    let (_bridge, mut output_rx, mut state_rx) =
        spawn_bridge(port, Arc::new(CountingTokens(AtomicU32::new(0))));

    wait_for_state(&mut state_rx, BridgeState::Connected).await;
    let banner = timeout(WAIT, output_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(banner, TerminalOutput::Banner(_)));
    let error = timeout(WAIT, output_rx.recv()).await.unwrap().unwrap();
    assert_eq!(error, TerminalOutput::Error("shell exited".to_string()));
}
