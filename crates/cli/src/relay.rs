//! WebSocket fan-out of session events on `/stream/{session_id}`.
//!
//! The relay subscribes to the [`SessionManager`] once and forwards every
//! session event to the sockets subscribed to that session. Each socket has
//! an unbounded outbound queue drained by its own send task, so publishing
//! never waits on a slow client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashctl::{SessionEvent, SessionEventKind, SessionManager, Subscription};
use dashctl_protocol::{ClientMessage, LifecycleEvent, RelayMessage, now_ms};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::api::AppState;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type ConnectionId = u64;
type Outbound = mpsc::UnboundedSender<Message>;

/// Session id to its subscribed connections. Empty sets are removed.
type ConnectionMap = HashMap<String, HashMap<ConnectionId, Outbound>>;

pub struct EventRelay {
	sessions: SessionManager,
	connections: Mutex<ConnectionMap>,
	next_id: AtomicU64,
	accepting: AtomicBool,
	/// Number of socket tasks still running.
	live: watch::Sender<usize>,
	_subscription: Subscription,
}

impl EventRelay {
	pub fn new(sessions: SessionManager) -> Arc<Self> {
		Arc::new_cyclic(|weak: &Weak<Self>| {
			let weak = weak.clone();
			let subscription = sessions.subscribe(move |event| {
				if let Some(relay) = weak.upgrade() {
					relay.on_session_event(event);
				}
			});
			Self {
				sessions,
				connections: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				accepting: AtomicBool::new(true),
				live: watch::channel(0).0,
				_subscription: subscription,
			}
		})
	}

	pub fn is_accepting(&self) -> bool {
		self.accepting.load(Ordering::Acquire)
	}

	/// Subscribers of one session.
	pub fn connection_count(&self, session_id: &str) -> usize {
		self.connections.lock().get(session_id).map_or(0, HashMap::len)
	}

	pub fn total_connections(&self) -> usize {
		self.connections.lock().values().map(HashMap::len).sum()
	}

	/// Sends `message` to every subscriber of `session_id` and returns how
	/// many queues accepted it. No subscribers is a no-op.
	pub fn publish(&self, session_id: &str, message: &RelayMessage) -> usize {
		let senders: Vec<Outbound> = match self.connections.lock().get(session_id) {
			Some(conns) => conns.values().cloned().collect(),
			None => return 0,
		};
		let text = match serde_json::to_string(message) {
			Ok(text) => text,
			Err(err) => {
				warn!(target = "dashctl.relay", error = %err, "failed to encode relay message");
				return 0;
			}
		};
		senders
			.iter()
			.filter(|tx| tx.send(Message::Text(text.clone().into())).is_ok())
			.count()
	}

	fn on_session_event(&self, event: &SessionEvent) {
		self.publish(&event.session_id, &event.to_relay_message());
		if event.kind == SessionEventKind::Lifecycle(LifecycleEvent::SessionCleaned) {
			self.close_session(&event.session_id, close_code::NORMAL, "Session cleaned up");
		}
	}

	/// Closes and forgets every subscriber of one session.
	fn close_session(&self, session_id: &str, code: u16, reason: &'static str) {
		let Some(conns) = self.connections.lock().remove(session_id) else {
			return;
		};
		debug!(target = "dashctl.relay", session_id, count = conns.len(), "closing session streams");
		for tx in conns.into_values() {
			let _ = tx.send(close_message(code, reason));
		}
	}

	/// Closes every connection.
	pub fn close_all(&self) {
		let all = std::mem::take(&mut *self.connections.lock());
		for tx in all.into_values().flat_map(HashMap::into_values) {
			let _ = tx.send(close_message(close_code::AWAY, "Server shutting down"));
		}
	}

	/// Stops accepting upgrades, closes every connection and waits for the
	/// socket tasks to finish.
	pub async fn shutdown(&self) {
		self.accepting.store(false, Ordering::Release);
		self.close_all();
		let mut live = self.live.subscribe();
		let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, live.wait_for(|n| *n == 0))
			.await
			.is_ok();
		if !drained {
			let remaining = *self.live.borrow();
			warn!(target = "dashctl.relay", remaining, "relay shutdown timed out");
		}
		info!(target = "dashctl.relay", "relay stopped");
	}

	fn register(&self, session_id: &str, tx: Outbound) -> ConnectionId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.connections
			.lock()
			.entry(session_id.to_string())
			.or_default()
			.insert(id, tx);
		id
	}

	fn unregister(&self, session_id: &str, id: ConnectionId) {
		let mut connections = self.connections.lock();
		if let Some(conns) = connections.get_mut(session_id) {
			conns.remove(&id);
			if conns.is_empty() {
				connections.remove(session_id);
			}
		}
	}

	async fn serve(self: Arc<Self>, socket: WebSocket, session_id: String) {
		self.live.send_modify(|n| *n += 1);
		let _live = LiveGuard(&self.live);

		if !self.is_accepting() || !self.sessions.has_session(&session_id) {
			warn!(target = "dashctl.relay", session_id = %session_id, "stream refused: unknown session");
			refuse(socket).await;
			return;
		}
		let (tx, rx) = mpsc::unbounded_channel();
		let conn_id = self.register(&session_id, tx.clone());
		// A cleanup between the check and the insert would never close this socket.
		if !self.sessions.has_session(&session_id) {
			self.unregister(&session_id, conn_id);
			refuse(socket).await;
			return;
		}
		info!(target = "dashctl.relay", session_id = %session_id, conn_id, "stream connected");

		let connected = RelayMessage::Connected {
			session_id: session_id.clone(),
			timestamp: now_ms(),
		};
		if let Ok(text) = serde_json::to_string(&connected) {
			let _ = tx.send(Message::Text(text.into()));
		}

		let (mut ws_tx, mut ws_rx) = socket.split();
		let mut rx_stream = UnboundedReceiverStream::new(rx);
		let mut send_task = tokio::spawn(async move {
			while let Some(msg) = rx_stream.next().await {
				let closing = matches!(msg, Message::Close(_));
				if ws_tx.send(msg).await.is_err() || closing {
					break;
				}
			}
		});

		loop {
			tokio::select! {
				incoming = ws_rx.next() => match incoming {
					Some(Ok(Message::Text(text))) => handle_client_text(&tx, &session_id, text.as_str()),
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						debug!(target = "dashctl.relay", session_id = %session_id, error = %err, "stream error");
						break;
					}
				},
				_ = &mut send_task => break,
			}
		}

		send_task.abort();
		self.unregister(&session_id, conn_id);
		info!(target = "dashctl.relay", session_id = %session_id, conn_id, "stream disconnected");
	}
}

struct LiveGuard<'a>(&'a watch::Sender<usize>);

impl Drop for LiveGuard<'_> {
	fn drop(&mut self) {
		self.0.send_modify(|n| *n = n.saturating_sub(1));
	}
}

fn close_message(code: u16, reason: &'static str) -> Message {
	Message::Close(Some(CloseFrame {
		code,
		reason: reason.into(),
	}))
}

async fn refuse(mut socket: WebSocket) {
	let _ = socket.send(close_message(close_code::POLICY, "Session not found")).await;
}

fn handle_client_text(tx: &Outbound, session_id: &str, text: &str) {
	match serde_json::from_str::<ClientMessage>(text) {
		Ok(ClientMessage::Ping) => {
			if let Ok(pong) = serde_json::to_string(&RelayMessage::Pong { timestamp: now_ms() }) {
				let _ = tx.send(Message::Text(pong.into()));
			}
		}
		Err(err) => {
			warn!(target = "dashctl.relay", session_id, error = %err, "ignoring malformed client message");
		}
	}
}

/// `GET /stream/{session_id}`.
pub async fn stream(
	ws: WebSocketUpgrade,
	Path(session_id): Path<String>,
	State(state): State<AppState>,
) -> Response {
	let relay = Arc::clone(&state.relay);
	if !relay.is_accepting() {
		return StatusCode::SERVICE_UNAVAILABLE.into_response();
	}
	ws.on_upgrade(move |socket| relay.serve(socket, session_id))
}
