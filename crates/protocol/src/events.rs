//! Messages exchanged over the per-session event stream.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Session lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEvent {
	SessionCreated,
	SessionCrashed,
	SessionCleaned,
}

/// Server-to-client message, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
	/// Sent once after the subscription is accepted.
	#[serde(rename_all = "camelCase")]
	Connected { session_id: String, timestamp: Timestamp },
	/// A `console.*` call in the page.
	Console {
		level: String,
		text: String,
		timestamp: Timestamp,
	},
	/// An uncaught exception in the page.
	Error {
		message: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		stack: Option<String>,
		timestamp: Timestamp,
	},
	/// A finished network request.
	Network {
		method: String,
		url: String,
		status: u16,
		timestamp: Timestamp,
	},
	/// A top-frame navigation.
	Navigation { url: String, timestamp: Timestamp },
	/// A session lifecycle transition.
	SessionEvent {
		event: LifecycleEvent,
		timestamp: Timestamp,
	},
	/// Reply to a client ping.
	Pong { timestamp: Timestamp },
}

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
	Ping,
}
