use std::time::Duration;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashctl_protocol::{
	ClickRequest, EvaluateRequest, NavigateRequest, OperationResult, QueryRequest, ReloadRequest, ScreenshotEncoding,
	ScreenshotQuery, SessionList, SessionStatus, StartSessionRequest, StartSessionResponse, StartedServers,
	TypeRequest, WaitRequest,
};
use serde_json::json;
use tracing::info;

use super::{AppState, JsonBody};
use crate::error::{ApiError, ApiResult};

/// Applied to navigation and element waits that name no timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn timeout_or_default(ms: Option<u64>) -> Duration {
	ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT)
}

pub async fn start(
	State(state): State<AppState>,
	JsonBody(req): JsonBody<StartSessionRequest>,
) -> ApiResult<Json<StartSessionResponse>> {
	// Capacity is claimed first so a full pool never starts servers.
	let slot = state.sessions.reserve()?;
	let servers = if req.start_servers {
		let (backend, dashboard) = state
			.servers
			.start_all(req.backend_options, req.dashboard_options)
			.await?;
		Some(StartedServers { backend, dashboard })
	} else {
		None
	};

	let session_id = slot.launch(req.options).await?;
	info!(target = "dashctl.api", session_id = %session_id, with_servers = servers.is_some(), "session started");
	Ok(Json(StartSessionResponse {
		session_id,
		dashboard_url: servers.as_ref().map(|s| s.dashboard.url.clone()),
		backend_url: servers.as_ref().map(|s| s.backend.server_url.clone()),
		servers,
	}))
}

pub async fn remove(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<OperationResult>> {
	if !state.sessions.cleanup(&session_id).await {
		return Err(dashctl::Error::SessionNotFound(session_id).into());
	}
	Ok(Json(OperationResult::ok().with("sessionId", session_id)))
}

pub async fn status(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<SessionStatus>> {
	Ok(Json(state.sessions.session_status(&session_id)?))
}

pub async fn list(State(state): State<AppState>) -> Json<SessionList> {
	let sessions = state.sessions.get_all_sessions();
	Json(SessionList {
		count: sessions.len(),
		sessions,
	})
}

pub async fn navigate(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<NavigateRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	let url = session
		.navigate(&req.url, req.wait_until, timeout_or_default(req.timeout))
		.await?;
	Ok(Json(OperationResult::ok().with("url", url)))
}

pub async fn click(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<ClickRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	session.click(&req.selector, timeout_or_default(req.timeout)).await?;
	Ok(Json(OperationResult::ok()))
}

pub async fn type_text(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<TypeRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	session
		.type_text(&req.selector, &req.text, req.clear, timeout_or_default(req.timeout))
		.await?;
	Ok(Json(OperationResult::ok()))
}

pub async fn wait(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<WaitRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	match (req.selector, req.ms) {
		(Some(selector), _) => {
			session
				.wait_for_selector(&selector, timeout_or_default(req.timeout))
				.await?;
		}
		(None, Some(ms)) => session.wait_for_timeout(Duration::from_millis(ms)).await?,
		(None, None) => {
			return Err(ApiError::BadRequest("wait needs a `selector` or `ms`".to_string()));
		}
	}
	Ok(Json(OperationResult::ok()))
}

pub async fn reload(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<ReloadRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	let url = session.reload(req.wait_until, timeout_or_default(req.timeout)).await?;
	Ok(Json(OperationResult::ok().with("url", url)))
}

pub async fn evaluate(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<EvaluateRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	let result = session.evaluate(&req.script).await?;
	Ok(Json(OperationResult::ok().with("result", result)))
}

pub async fn query(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	JsonBody(req): JsonBody<QueryRequest>,
) -> ApiResult<Json<OperationResult>> {
	let session = state.sessions.get_session(&session_id)?;
	let elements = session.query(&req.selector).await?;
	Ok(Json(
		OperationResult::ok()
			.with("count", elements.len())
			.with("elements", json!(elements)),
	))
}

pub async fn screenshot(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	query: Result<Query<ScreenshotQuery>, QueryRejection>,
) -> ApiResult<Response> {
	let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
	let session = state.sessions.get_session(&session_id)?;
	let png = session.screenshot(query.full_page).await?;
	Ok(match query.encoding {
		ScreenshotEncoding::Binary => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
		ScreenshotEncoding::Base64 => Json(
			OperationResult::ok()
				.with("mimeType", "image/png")
				.with("data", STANDARD.encode(&png)),
		)
		.into_response(),
	})
}
