//! DevTools protocol connection.
//!
//! Implements the request/response correlation layer on top of the transport:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Routing events to the target session they belong to
//! - Failing every pending request once the transport goes away
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with method, params and an optional
//!    target session id
//! 2. Connection allocates an ID and parks a oneshot sender under it
//! 3. Request is serialized and queued for the transport writer
//! 4. [`Connection::run`] reads inbound frames, resolves the matching sender
//!    or forwards the event to the subscribed session
//! 5. When the inbound stream ends the connection flips its `closed` flag


use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};

/// Command sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	pub params: Value,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<RemoteError>,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Error payload of a failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
	pub code: i64,
	pub message: String,
}

/// Event pushed by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpEvent {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (has `method`, no `id`)
	Event(CdpEvent),
	/// Anything else (forward-compatible catch-all)
	Unknown(Value),
}

struct Pending {
	method: String,
	tx: oneshot::Sender<Result<Value>>,
}

type CallbackMap = Arc<Mutex<HashMap<u64, Pending>>>;

/// RAII guard removing the parked callback when a request future is dropped.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(target = "dashctl.cdp", id = self.id, "removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// DevTools connection shared by a browser and its pages.
pub struct Connection {
	last_id: AtomicU64,
	callbacks: CallbackMap,
	outbound_tx: mpsc::UnboundedSender<String>,
	/// Event sinks keyed by target session id.
	sessions: Mutex<HashMap<String, mpsc::UnboundedSender<CdpEvent>>>,
	closed: watch::Sender<bool>,
}

impl Connection {
	/// Creates a connection writing serialized requests to `outbound_tx`.
	pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Arc<Self> {
		let (closed, _) = watch::channel(false);
		Arc::new(Self {
			last_id: AtomicU64::new(1),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx,
			sessions: Mutex::new(HashMap::new()),
			closed,
		})
	}

	/// Sends a command and awaits its result.
	///
	/// `session_id` addresses a page target attached in flattened mode;
	/// `None` addresses the browser itself.
	pub async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::TargetClosed(format!("connection closed before {method}")));
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(
			id,
			Pending {
				method: method.to_string(),
				tx,
			},
		);
		let guard = CancelGuard {
			id,
			callbacks: Arc::clone(&self.callbacks),
			completed: false,
		};

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_owned),
		};
		let payload = serde_json::to_string(&request)?;
		tracing::trace!(target = "dashctl.cdp", id, method, "sending command");

		if self.outbound_tx.send(payload).is_err() {
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Routes events for `session_id` to the returned receiver.
	///
	/// A later subscription for the same session replaces the earlier one.
	pub fn subscribe_session(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpEvent> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.sessions.lock().insert(session_id.to_string(), tx);
		rx
	}

	/// Stops routing events for `session_id`.
	pub fn unsubscribe_session(&self, session_id: &str) {
		self.sessions.lock().remove(session_id);
	}

	/// Returns a receiver that flips to `true` once the transport is gone.
	pub fn closed(&self) -> watch::Receiver<bool> {
		self.closed.subscribe()
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Runs the inbound dispatch loop until the transport closes.
	pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<String>) {
		while let Some(raw) = inbound.recv().await {
			match serde_json::from_str::<Message>(&raw) {
				Ok(message) => self.dispatch(message),
				Err(err) => {
					tracing::warn!(target = "dashctl.cdp", error = %err, "failed to parse devtools message");
				}
			}
		}
		self.shutdown();
	}

	fn dispatch(&self, message: Message) {
		match message {
			Message::Response(response) => {
				let Some(pending) = self.callbacks.lock().remove(&response.id) else {
					tracing::debug!(target = "dashctl.cdp", id = response.id, "response for unknown request");
					return;
				};
				let result = match response.error {
					Some(err) => Err(Error::Remote {
						method: pending.method,
						code: err.code,
						message: err.message,
					}),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = pending.tx.send(result);
			}
			Message::Event(event) => {
				let Some(session_id) = event.session_id.clone() else {
					tracing::trace!(target = "dashctl.cdp", method = %event.method, "browser event");
					return;
				};
				let mut sessions = self.sessions.lock();
				if let Some(sink) = sessions.get(&session_id) {
					if sink.send(event).is_err() {
						sessions.remove(&session_id);
					}
				}
			}
			Message::Unknown(value) => {
				tracing::debug!(target = "dashctl.cdp", %value, "ignoring unrecognized message");
			}
		}
	}

	/// Fails every pending request and drops all event sinks.
	fn shutdown(&self) {
		self.closed.send_replace(true);
		let pending: Vec<Pending> = self.callbacks.lock().drain().map(|(_, p)| p).collect();
		for p in pending {
			let _ = p
				.tx
				.send(Err(Error::TargetClosed(format!("connection closed during {}", p.method))));
		}
		self.sessions.lock().clear();
		tracing::debug!(target = "dashctl.cdp", "devtools connection closed");
	}
}
