//! Backend and dashboard server options and status reports.

use serde::{Deserialize, Serialize};

/// Options for starting the backend API process.
///
/// Unset fields use the orchestrator defaults (`testAppId`, `testMasterKey`,
/// `/parse`, a free port, the configured database URI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub master_key: Option<String>,
	#[serde(default, rename = "databaseURI", skip_serializing_if = "Option::is_none")]
	pub database_uri: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mount_path: Option<String>,
	/// Health-check budget in milliseconds; defaults to 20000.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
}

/// Resolved configuration of a running backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
	pub port: u16,
	#[serde(rename = "serverURL")]
	pub server_url: String,
	pub app_id: String,
	pub master_key: String,
	#[serde(rename = "databaseURI")]
	pub database_uri: String,
	pub mount_path: String,
}

/// Options for starting the dashboard server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_name: Option<String>,
}

/// Address of a running dashboard server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardInfo {
	pub port: u16,
	pub url: String,
}

/// Status of the backend process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
	pub running: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(default, rename = "serverURL", skip_serializing_if = "Option::is_none")]
	pub server_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_id: Option<String>,
}

impl BackendStatus {
	pub fn stopped() -> Self {
		Self {
			running: false,
			port: None,
			server_url: None,
			app_id: None,
		}
	}
}

/// Status of the dashboard server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStatus {
	pub running: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

impl DashboardStatus {
	pub fn stopped() -> Self {
		Self {
			running: false,
			port: None,
			url: None,
		}
	}
}

/// Response of `GET /servers/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersStatus {
	pub backend: BackendStatus,
	pub dashboard: DashboardStatus,
}

/// One app entry of the dashboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardApp {
	#[serde(rename = "serverURL")]
	pub server_url: String,
	pub app_id: String,
	pub master_key: String,
	pub app_name: String,
}

/// Configuration document served to the dashboard UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardAppConfig {
	pub apps: Vec<DashboardApp>,
	#[serde(default)]
	pub allow_insecure_http: bool,
}
