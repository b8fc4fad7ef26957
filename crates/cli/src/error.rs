//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashctl_protocol::ErrorBody;
use thiserror::Error;
use tracing::{debug, warn};

/// A failure rendered as `{"error": ..., "code": ...}` with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	Core(#[from] dashctl::Error),

	/// Malformed path, query or body.
	#[error("{0}")]
	BadRequest(String),

	/// No route matched.
	#[error("Not found")]
	NotFound,
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Core(err) => StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
			Self::NotFound => StatusCode::NOT_FOUND,
		}
	}

	pub fn code(&self) -> &'static str {
		match self {
			Self::Core(err) => err.code(),
			Self::BadRequest(_) => "invalid_argument",
			Self::NotFound => "not_found",
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			warn!(target = "dashctl.api", status = status.as_u16(), error = %self, "request failed");
		} else {
			debug!(target = "dashctl.api", status = status.as_u16(), error = %self, "request rejected");
		}
		let body = ErrorBody {
			error: self.to_string(),
			code: self.code().to_string(),
		};
		(status, Json(body)).into_response()
	}
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn core_errors_keep_their_status() {
		let err = ApiError::from(dashctl::Error::CapacityExceeded { max: 5 });
		assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
		assert_eq!(err.code(), "capacity_exceeded");
		assert_eq!(err.to_string(), "Maximum concurrent sessions (5) reached");
	}

	#[test]
	fn bad_requests_are_invalid_arguments() {
		let err = ApiError::BadRequest("missing field `url`".into());
		assert_eq!(err.status(), StatusCode::BAD_REQUEST);
		assert_eq!(err.code(), "invalid_argument");
	}
}
