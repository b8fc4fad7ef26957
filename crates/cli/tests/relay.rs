use std::sync::Arc;
use std::time::Duration;

use dashctl::testing::FakeBackend;
use dashctl::{OrchestratorConfig, ServerOrchestrator, SessionConfig, SessionManager};
use dashctl_cli::api::AppState;
use dashctl_cli::server;
use dashctl_protocol::{RelayMessage, SessionOptions};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
	base: String,
	state: AppState,
	backend: FakeBackend,
	shutdown: Option<oneshot::Sender<()>>,
	server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
	async fn start() -> Self {
		let backend = FakeBackend::new();
		let sessions = SessionManager::new(SessionConfig::default(), Arc::new(backend.clone()));
		let servers = ServerOrchestrator::new(OrchestratorConfig::default());
		let state = AppState::new(sessions, servers);

		let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let (tx, rx) = oneshot::channel::<()>();
		let server = tokio::spawn(server::run_until(listener, state.clone(), async move {
			let _ = rx.await;
		}));

		Self {
			base: format!("ws://127.0.0.1:{port}"),
			state,
			backend,
			shutdown: Some(tx),
			server,
		}
	}

	async fn session(&self) -> String {
		self.state.sessions.create_session(SessionOptions::default()).await.unwrap()
	}

	async fn connect(&self, session_id: &str) -> Ws {
		let (ws, _) = connect_async(format!("{}/stream/{session_id}", self.base)).await.unwrap();
		ws
	}

	/// Connects and consumes the `connected` greeting.
	async fn subscribe(&self, session_id: &str) -> Ws {
		let mut ws = self.connect(session_id).await;
		let hello = next_json(&mut ws).await;
		assert_eq!(hello["type"], "connected");
		assert_eq!(hello["sessionId"], session_id);
		ws
	}
}

async fn next_message(ws: &mut Ws) -> Message {
	loop {
		let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
			.await
			.expect("no message within 5s")
			.expect("stream ended")
			.expect("websocket error");
		if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
			return msg;
		}
	}
}

async fn next_json(ws: &mut Ws) -> Value {
	match next_message(ws).await {
		Message::Text(text) => serde_json::from_str(&text).unwrap(),
		other => panic!("expected text, got {other:?}"),
	}
}

/// Skips text frames until the close frame.
async fn next_close(ws: &mut Ws) -> CloseFrame<'static> {
	loop {
		match next_message(ws).await {
			Message::Close(Some(frame)) => return frame.into_owned(),
			Message::Text(_) => continue,
			other => panic!("expected close, got {other:?}"),
		}
	}
}

async fn send_text(ws: &mut Ws, text: &str) {
	ws.send(Message::Text(text.into())).await.unwrap();
}

#[tokio::test]
async fn unknown_session_is_refused_with_policy_violation() {
	let harness = Harness::start().await;
	let mut ws = harness.connect("no-such-session").await;

	let frame = next_close(&mut ws).await;
	assert_eq!(frame.code, CloseCode::Policy);
	assert_eq!(frame.reason, "Session not found");
	assert_eq!(harness.state.relay.total_connections(), 0);
}

#[tokio::test]
async fn page_events_reach_subscribers() {
	let harness = Harness::start().await;
	let id = harness.session().await;
	let mut first = harness.subscribe(&id).await;
	let mut second = harness.subscribe(&id).await;
	assert_eq!(harness.state.relay.connection_count(&id), 2);

	harness.backend.last_launch().unwrap().emit_console("warn", "low disk");

	for ws in [&mut first, &mut second] {
		let msg = next_json(ws).await;
		assert_eq!(msg["type"], "console");
		assert_eq!(msg["level"], "warn");
		assert_eq!(msg["text"], "low disk");
		assert!(msg["timestamp"].as_u64().is_some());
	}
}

#[tokio::test]
async fn events_stay_within_their_session() {
	let harness = Harness::start().await;
	let a = harness.session().await;
	let b = harness.session().await;
	let mut ws_a = harness.subscribe(&a).await;

	// Launches are in creation order; index 1 belongs to `b`.
	harness.backend.launches()[1].emit_console("log", "for b");
	harness.backend.launches()[0].emit_console("log", "for a");

	let msg = next_json(&mut ws_a).await;
	assert_eq!(msg["text"], "for a");
	assert_eq!(harness.state.relay.connection_count(&b), 0);
}

#[tokio::test]
async fn ping_gets_pong_and_garbage_is_ignored() {
	let harness = Harness::start().await;
	let id = harness.session().await;
	let mut ws = harness.subscribe(&id).await;

	send_text(&mut ws, "not json").await;
	send_text(&mut ws, r#"{"type":"subscribe"}"#).await;
	send_text(&mut ws, r#"{"type":"ping"}"#).await;

	let pong = next_json(&mut ws).await;
	assert_eq!(pong["type"], "pong");
	assert_eq!(harness.state.relay.connection_count(&id), 1);
}

#[tokio::test]
async fn cleanup_closes_streams_normally() {
	let harness = Harness::start().await;
	let id = harness.session().await;
	let mut ws = harness.subscribe(&id).await;

	assert!(harness.state.sessions.cleanup(&id).await);

	let cleaned = next_json(&mut ws).await;
	assert_eq!(cleaned["type"], "session-event");
	assert_eq!(cleaned["event"], "session-cleaned");
	let frame = next_close(&mut ws).await;
	assert_eq!(frame.code, CloseCode::Normal);
	assert_eq!(harness.state.relay.connection_count(&id), 0);
}

#[tokio::test]
async fn publishing_without_subscribers_is_a_no_op() {
	let harness = Harness::start().await;
	let id = harness.session().await;
	let delivered = harness
		.state
		.relay
		.publish(&id, &RelayMessage::Pong { timestamp: 0 });
	assert_eq!(delivered, 0);
	assert_eq!(harness.state.relay.total_connections(), 0);
}

#[tokio::test]
async fn shutdown_closes_streams_and_sessions() {
	let mut harness = Harness::start().await;
	let id = harness.session().await;
	let mut ws = harness.subscribe(&id).await;

	harness.shutdown.take().unwrap().send(()).unwrap();

	let frame = next_close(&mut ws).await;
	assert_eq!(frame.code, CloseCode::Away);
	harness.server.await.unwrap().unwrap();
	assert!(!harness.state.relay.is_accepting());
	assert_eq!(harness.state.relay.total_connections(), 0);
	assert_eq!(harness.state.sessions.session_count(), 0);
	assert!(harness.backend.last_launch().unwrap().is_browser_closed());
}
