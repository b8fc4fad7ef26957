//! Error types for the Chromium runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching or driving the browser.
#[derive(Debug, Error)]
pub enum Error {
	/// No Chromium executable was found.
	#[error("Chromium executable not found. Set DASHCTL_BROWSER or install chromium/google-chrome")]
	BrowserNotFound,

	/// Failed to launch the browser process.
	#[error("Failed to launch browser: {0}")]
	LaunchFailed(String),

	/// Failed to establish the DevTools connection.
	#[error("Failed to connect to DevTools endpoint: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (WebSocket framing).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Malformed or unexpected DevTools message.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error returned by the browser for a command.
	#[error("{method} failed: {message} (code {code})")]
	Remote {
		method: String,
		code: i64,
		message: String,
	},

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Timeout waiting for an operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Navigation did not reach the requested load state in time.
	#[error("Navigation timeout after {duration_ms}ms navigating to '{url}'")]
	NavigationTimeout { url: String, duration_ms: u64 },

	/// The browser refused the navigation (DNS failure, refused connection...).
	#[error("Navigation to '{url}' failed: {reason}")]
	Navigation { url: String, reason: String },

	/// The page or browser is gone.
	#[error("Target closed: {0}")]
	TargetClosed(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Element not found by selector.
	#[error("Element not found: selector '{0}'")]
	ElementNotFound(String),

	/// The evaluated script threw.
	#[error("Evaluation failed: {0}")]
	Evaluation(String),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_) | Error::NavigationTimeout { .. })
	}

	/// Returns true if the page, browser, or connection is gone.
	pub fn is_target_closed(&self) -> bool {
		matches!(self, Error::TargetClosed(_) | Error::ChannelClosed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_timeouts() {
		assert!(Error::Timeout("x".into()).is_timeout());
		assert!(
			Error::NavigationTimeout {
				url: "http://a".into(),
				duration_ms: 10
			}
			.is_timeout()
		);
		assert!(!Error::ChannelClosed.is_timeout());
		assert!(Error::ChannelClosed.is_target_closed());
	}

	#[test]
	fn remote_error_names_the_method() {
		let err = Error::Remote {
			method: "Page.navigate".into(),
			code: -32000,
			message: "Cannot navigate to invalid URL".into(),
		};
		assert_eq!(
			err.to_string(),
			"Page.navigate failed: Cannot navigate to invalid URL (code -32000)"
		);
	}
}
