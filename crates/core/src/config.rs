//! Library configuration with zero-config defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Session pool settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Hard admission limit on live sessions.
	pub max_sessions: usize,
	/// Sessions idle longer than this are evicted by the sweeper.
	pub idle_timeout: Duration,
	pub sweep_interval: Duration,
	/// Delay between a crash being observed and automatic cleanup.
	pub crash_grace: Duration,
	/// When set, forces headless (or headed) regardless of the request.
	pub headless_override: Option<bool>,
	pub default_slow_mo: u64,
	pub default_width: u32,
	pub default_height: u32,
	pub browser_executable: Option<PathBuf>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			max_sessions: 5,
			idle_timeout: Duration::from_secs(30 * 60),
			sweep_interval: Duration::from_secs(60),
			crash_grace: Duration::from_secs(5),
			headless_override: None,
			default_slow_mo: 0,
			default_width: 1280,
			default_height: 720,
			browser_executable: None,
		}
	}
}

/// Backend and dashboard server settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
	/// Program and leading arguments used to start the backend.
	pub backend_command: Vec<String>,
	pub database_uri: String,
	/// Port used when a start request does not name one.
	pub backend_port: Option<u16>,
	pub dashboard_port: Option<u16>,
	pub health_timeout: Duration,
	pub health_interval: Duration,
	/// Grace period between SIGTERM and a forced kill.
	pub stop_grace: Duration,
	/// Static dashboard build to serve; a placeholder index is used otherwise.
	pub dashboard_assets: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			backend_command: vec!["npx".to_string(), "parse-server".to_string()],
			database_uri: "mongodb://localhost:27017/dashctl".to_string(),
			backend_port: None,
			dashboard_port: None,
			health_timeout: Duration::from_secs(20),
			health_interval: Duration::from_millis(500),
			stop_grace: Duration::from_secs(5),
			dashboard_assets: None,
		}
	}
}
