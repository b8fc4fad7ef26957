//! HTTP control surface.

mod ready;
mod servers;
mod session;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dashctl::{ReadyState, ServerOrchestrator, SessionManager};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::relay::{self, EventRelay};

/// Everything the handlers share. Built once by the serve loop.
#[derive(Clone)]
pub struct AppState {
	pub sessions: SessionManager,
	pub servers: ServerOrchestrator,
	pub ready: ReadyState,
	pub relay: Arc<EventRelay>,
}

impl AppState {
	pub fn new(sessions: SessionManager, servers: ServerOrchestrator) -> Self {
		let relay = EventRelay::new(sessions.clone());
		Self {
			sessions,
			servers,
			ready: ReadyState::new(),
			relay,
		}
	}

	/// Closes streams, then sessions, then servers.
	pub async fn shutdown(&self) -> dashctl::Result<()> {
		self.relay.shutdown().await;
		self.sessions.shutdown().await;
		self.servers.stop_all().await
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/session/start", post(session::start))
		.route("/session/{session_id}", delete(session::remove))
		.route("/session/{session_id}/status", get(session::status))
		.route("/session/{session_id}/navigate", post(session::navigate))
		.route("/session/{session_id}/click", post(session::click))
		.route("/session/{session_id}/type", post(session::type_text))
		.route("/session/{session_id}/wait", post(session::wait))
		.route("/session/{session_id}/reload", post(session::reload))
		.route("/session/{session_id}/evaluate", post(session::evaluate))
		.route("/session/{session_id}/query", post(session::query))
		.route("/session/{session_id}/screenshot", get(session::screenshot))
		.route("/sessions", get(session::list))
		.route("/servers/status", get(servers::status))
		.route("/servers/stop", post(servers::stop))
		.route("/cleanup", post(servers::cleanup))
		.route("/ready", get(ready::status).put(ready::report))
		.route("/ready/wait", get(ready::wait))
		.route("/stream/{session_id}", get(relay::stream))
		.fallback(not_found)
		.with_state(state)
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
	ApiError::NotFound
}

/// JSON request body where an empty body means `{}`.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
	S: Send + Sync,
	T: DeserializeOwned,
{
	type Rejection = ApiError;

	async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
		let bytes = Bytes::from_request(req, state)
			.await
			.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
		let raw: &[u8] = if bytes.trim_ascii().is_empty() { b"{}" } else { &bytes };
		serde_json::from_slice(raw)
			.map(JsonBody)
			.map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))
	}
}
