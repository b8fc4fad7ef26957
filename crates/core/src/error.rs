//! Error types for session management and server orchestration.

use thiserror::Error;

/// Result type alias for dashctl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session manager, the orchestrator and the prober.
#[derive(Debug, Error)]
pub enum Error {
	/// The session pool is full.
	#[error("Maximum concurrent sessions ({max}) reached")]
	CapacityExceeded { max: usize },

	#[error("Session {0} not found")]
	SessionNotFound(String),

	/// The session's browser disconnected; only cleanup is allowed.
	#[error("Session {0} has crashed")]
	SessionCrashed(String),

	#[error("Failed to launch browser: {0}")]
	LaunchFailed(String),

	/// A health endpoint never answered in time.
	#[error("Health check for {url} timed out after {timeout_ms}ms (waited {elapsed_ms}ms)")]
	HealthCheckTimeout {
		url: String,
		timeout_ms: u64,
		elapsed_ms: u64,
	},

	#[error("Port {0} is already in use")]
	PortInUse(u16),

	/// Page automation failure reported by the browser driver.
	#[error(transparent)]
	Browser(#[from] dashctl_runtime::Error),

	#[error("Timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// A supervised child exited before becoming healthy.
	#[error("{service} exited with {status} before becoming healthy{}", format_output(.output))]
	ProcessExited {
		service: &'static str,
		status: String,
		output: Vec<String>,
	},

	/// Startup failed; carries the output captured so far.
	#[error("{service} failed to start: {source}{}", format_output(.output))]
	StartupFailed {
		service: &'static str,
		#[source]
		source: Box<Error>,
		output: Vec<String>,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

fn format_output(lines: &[String]) -> String {
	if lines.is_empty() {
		String::new()
	} else {
		format!("\n--- output ---\n{}", lines.join("\n"))
	}
}

impl Error {
	/// Returns true for every timeout-class error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::HealthCheckTimeout { .. } | Error::Timeout { .. } => true,
			Error::Browser(err) => err.is_timeout(),
			Error::StartupFailed { source, .. } => source.is_timeout(),
			_ => false,
		}
	}

	/// HTTP status this error maps to at the API boundary.
	pub fn status_code(&self) -> u16 {
		match self {
			Error::CapacityExceeded { .. } => 429,
			Error::SessionNotFound(_) => 404,
			Error::SessionCrashed(_) => 410,
			Error::PortInUse(_) => 409,
			Error::InvalidArgument(_) => 400,
			Error::Browser(dashctl_runtime::Error::ElementNotFound(_)) => 404,
			Error::Browser(dashctl_runtime::Error::Evaluation(_)) => 400,
			err if err.is_timeout() => 408,
			_ => 500,
		}
	}

	/// Stable snake_case identifier for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Error::CapacityExceeded { .. } => "capacity_exceeded",
			Error::SessionNotFound(_) => "session_not_found",
			Error::SessionCrashed(_) => "session_crashed",
			Error::LaunchFailed(_) => "launch_failed",
			Error::HealthCheckTimeout { .. } => "health_check_timeout",
			Error::PortInUse(_) => "port_in_use",
			Error::Browser(err) if err.is_timeout() => "timeout",
			Error::Browser(dashctl_runtime::Error::ElementNotFound(_)) => "element_not_found",
			Error::Browser(dashctl_runtime::Error::Evaluation(_)) => "evaluation_failed",
			Error::Browser(_) => "upstream_error",
			Error::Timeout { .. } => "timeout",
			Error::InvalidArgument(_) => "invalid_argument",
			Error::ProcessExited { .. } | Error::StartupFailed { .. } => "startup_failed",
			Error::Io(_) => "io_error",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_codes_follow_taxonomy() {
		assert_eq!(Error::CapacityExceeded { max: 5 }.status_code(), 429);
		assert_eq!(Error::SessionNotFound("a".into()).status_code(), 404);
		assert_eq!(Error::SessionCrashed("a".into()).status_code(), 410);
		assert_eq!(Error::PortInUse(1337).status_code(), 409);
		assert_eq!(
			Error::Timeout {
				ms: 10,
				condition: "ready".into()
			}
			.status_code(),
			408
		);
		assert_eq!(
			Error::Browser(dashctl_runtime::Error::NavigationTimeout {
				url: "http://x".into(),
				duration_ms: 5
			})
			.status_code(),
			408
		);
		assert_eq!(Error::LaunchFailed("boom".into()).status_code(), 500);
	}

	#[test]
	fn health_timeout_mentions_timeout_value() {
		let err = Error::HealthCheckTimeout {
			url: "http://127.0.0.1:1/parse/health".into(),
			timeout_ms: 20000,
			elapsed_ms: 20011,
		};
		assert!(err.to_string().contains("20000ms"));
		assert_eq!(err.code(), "health_check_timeout");
	}

	#[test]
	fn startup_failure_includes_captured_output() {
		let err = Error::StartupFailed {
			service: "backend",
			source: Box::new(Error::ProcessExited {
				service: "backend",
				status: "exit status: 3".into(),
				output: vec![],
			}),
			output: vec!["listening...".into(), "Error: no database".into()],
		};
		let msg = err.to_string();
		assert!(msg.contains("exit status: 3"));
		assert!(msg.contains("Error: no database"));
		assert!(!err.is_timeout());
	}
}
