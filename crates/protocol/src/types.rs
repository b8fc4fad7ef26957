//! Primitive types shared across the wire.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Returns the current wall-clock time as a [`Timestamp`].
pub fn now_ms() -> Timestamp {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}

/// Page load state a navigation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
	/// Navigation is finished after the `load` event fires
	#[default]
	Load,
	/// Navigation is finished when `DOMContentLoaded` fires
	#[serde(rename = "domcontentloaded")]
	DomContentLoaded,
}

/// Structured error body returned by every failing HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Human-readable message
	pub error: String,
	/// Stable snake_case error code (for example `capacity_exceeded`)
	pub code: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wait_until_uses_browser_event_names() {
		assert_eq!(serde_json::to_string(&WaitUntil::Load).unwrap(), "\"load\"");
		assert_eq!(
			serde_json::from_str::<WaitUntil>("\"domcontentloaded\"").unwrap(),
			WaitUntil::DomContentLoaded
		);
	}

	#[test]
	fn now_is_after_2020() {
		assert!(now_ms() > 1_577_836_800_000);
	}
}
