use std::time::Duration;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use dashctl_protocol::{ReadyReport, ReadyStatus, ReadyWaitQuery};
use tracing::info;

use super::{AppState, JsonBody};
use crate::error::{ApiError, ApiResult};

const DEFAULT_WAIT: Duration = Duration::from_secs(30);

pub async fn status(State(state): State<AppState>) -> Json<ReadyStatus> {
	Json(state.ready.status())
}

/// Blocks until the build is ready; 408 once the timeout passes.
pub async fn wait(
	State(state): State<AppState>,
	query: Result<Query<ReadyWaitQuery>, QueryRejection>,
) -> ApiResult<Json<ReadyStatus>> {
	let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
	let timeout = query.timeout.map(Duration::from_millis).unwrap_or(DEFAULT_WAIT);
	Ok(Json(state.ready.wait_ready(timeout).await?))
}

pub async fn report(State(state): State<AppState>, JsonBody(report): JsonBody<ReadyReport>) -> Json<ReadyStatus> {
	info!(target = "dashctl.api", state = ?report.state, "build state reported");
	state.ready.set(report.state, report.error);
	Json(state.ready.status())
}
