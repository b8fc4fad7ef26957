//! Session creation, summaries and page automation bodies.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use crate::servers::{BackendConfig, BackendOptions, DashboardInfo, DashboardOptions};
use crate::types::{Timestamp, WaitUntil};

/// Options accepted when creating a browser session.
///
/// Unset fields fall back to the session manager defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub headless: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub width: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub height: Option<u32>,
	/// Delay in milliseconds applied before every page operation.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub slow_mo: Option<u64>,
}

/// Point-in-time view of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
	pub session_id: String,
	pub created_at: Timestamp,
	pub last_activity: Timestamp,
	/// Milliseconds since creation.
	pub uptime: u64,
	pub crashed: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page_url: Option<String>,
}

/// Body of `POST /session/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
	#[serde(flatten)]
	pub options: SessionOptions,
	/// Start (or reuse) the backend and dashboard before launching the browser.
	#[serde(default)]
	pub start_servers: bool,
	#[serde(default)]
	pub backend_options: BackendOptions,
	#[serde(default)]
	pub dashboard_options: DashboardOptions,
}

/// Response of `POST /session/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
	pub session_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dashboard_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub backend_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub servers: Option<StartedServers>,
}

/// Servers brought up alongside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedServers {
	pub backend: BackendConfig,
	pub dashboard: DashboardInfo,
}

/// Response of `GET /session/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
	pub session_id: String,
	pub active: bool,
	#[serde(default)]
	pub page_url: Option<String>,
	pub created_at: Timestamp,
	pub last_activity: Timestamp,
	pub uptime: u64,
}

/// Response of `GET /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionList {
	pub sessions: Vec<SessionSummary>,
	pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateRequest {
	pub url: String,
	#[serde(default)]
	pub wait_until: WaitUntil,
	/// Milliseconds; defaults to 30000.
	#[serde(default)]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRequest {
	pub selector: String,
	#[serde(default)]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRequest {
	pub selector: String,
	pub text: String,
	/// Clear the field before typing.
	#[serde(default)]
	pub clear: bool,
	#[serde(default)]
	pub timeout: Option<u64>,
}

/// Body of `POST /session/{id}/wait`: a selector, a fixed delay, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitRequest {
	#[serde(default)]
	pub selector: Option<String>,
	#[serde(default)]
	pub timeout: Option<u64>,
	/// Fixed delay in milliseconds, applied when no selector is given.
	#[serde(default)]
	pub ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadRequest {
	#[serde(default)]
	pub wait_until: WaitUntil,
	#[serde(default)]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
	/// JavaScript expression; promises are awaited.
	pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
	pub selector: String,
}

/// Summary of one element matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
	pub tag: String,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub classes: Vec<String>,
	#[serde(default)]
	pub text: String,
	pub visible: bool,
	#[serde(default)]
	pub bounds: Option<ElementBounds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementBounds {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

/// Encoding of `GET /session/{id}/screenshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotEncoding {
	/// JSON body with a base64 PNG
	#[default]
	Base64,
	/// Raw `image/png` body
	Binary,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotQuery {
	#[serde(default, deserialize_with = "query_flag")]
	pub full_page: bool,
	#[serde(default)]
	pub encoding: ScreenshotEncoding,
}

/// Accepts `true`/`false`, `1`/`0`, and a bare flag such as `?fullPage`.
fn query_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Flag {
		Bool(bool),
		Text(String),
	}

	match Flag::deserialize(deserializer)? {
		Flag::Bool(value) => Ok(value),
		Flag::Text(text) => match text.as_str() {
			"" | "1" | "true" | "yes" | "on" => Ok(true),
			"0" | "false" | "no" | "off" => Ok(false),
			other => Err(de::Error::invalid_value(de::Unexpected::Str(other), &"a boolean flag")),
		},
	}
}

/// Successful page operation result; extra fields are operation-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
	pub success: bool,
	#[serde(flatten)]
	pub data: serde_json::Map<String, Value>,
}

impl OperationResult {
	pub fn ok() -> Self {
		Self {
			success: true,
			data: serde_json::Map::new(),
		}
	}

	pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.data.insert(key.to_string(), value.into());
		self
	}
}
