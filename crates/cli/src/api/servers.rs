use axum::Json;
use axum::extract::State;
use dashctl_protocol::{OperationResult, ServersStatus};
use tracing::info;

use super::AppState;
use crate::error::ApiResult;

pub async fn status(State(state): State<AppState>) -> Json<ServersStatus> {
	Json(state.servers.get_status())
}

pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<OperationResult>> {
	state.servers.stop_all().await?;
	Ok(Json(OperationResult::ok()))
}

/// Cleans every session, then stops both servers.
pub async fn cleanup(State(state): State<AppState>) -> ApiResult<Json<OperationResult>> {
	let cleaned = state.sessions.cleanup_all().await;
	state.servers.stop_all().await?;
	info!(target = "dashctl.api", sessions = cleaned, "cleanup finished");
	Ok(Json(OperationResult::ok().with("sessionsCleaned", cleaned)))
}
