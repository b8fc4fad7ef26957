//! Build readiness reports.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Phase reported by the external build watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
	Building,
	#[default]
	Ready,
	Failed,
}

/// Response of `GET /ready` and `GET /ready/wait`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyStatus {
	pub ready: bool,
	pub state: BuildPhase,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub updated_at: Timestamp,
}

/// Body of `PUT /ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyReport {
	pub state: BuildPhase,
	#[serde(default)]
	pub error: Option<String>,
}

/// Query of `GET /ready/wait`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReadyWaitQuery {
	/// Milliseconds; defaults to 30000.
	#[serde(default)]
	pub timeout: Option<u64>,
}
