//! Backend API process: command line, startup and health gating.

use std::process::ExitStatus;
use std::time::Duration;

use dashctl_protocol::{BackendConfig, BackendOptions};
use tokio::process::Child;

use super::process::{self, OutputLog};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::probe::poll_health_url;

pub const DEFAULT_APP_ID: &str = "testAppId";
pub const DEFAULT_MASTER_KEY: &str = "testMasterKey";
pub const DEFAULT_MOUNT_PATH: &str = "/parse";

/// How long to wait for trailing output after a failed start.
const OUTPUT_SETTLE: Duration = Duration::from_millis(500);

/// A backend child that passed its health check.
pub struct BackendProcess {
	pub config: BackendConfig,
	pub child: Child,
	pub output: OutputLog,
}

impl BackendProcess {
	/// Returns false once the child has exited.
	pub fn is_alive(&mut self) -> bool {
		matches!(self.child.try_wait(), Ok(None))
	}
}

/// Single leading slash, no trailing slash; the root mounts at `/`.
pub fn normalize_mount_path(raw: &str) -> String {
	let trimmed = raw.trim().trim_matches('/');
	if trimmed.is_empty() {
		"/".to_string()
	} else {
		format!("/{trimmed}")
	}
}

/// Health endpoint for a backend listening on `port` under `mount_path`.
pub fn health_url(port: u16, mount_path: &str) -> String {
	let mount = mount_path.trim_end_matches('/');
	format!("http://127.0.0.1:{port}{mount}/health")
}

/// Fills in defaults for everything `options` leaves unset except the port.
pub fn resolve_config(options: &BackendOptions, port: u16, config: &OrchestratorConfig) -> BackendConfig {
	let mount_path = normalize_mount_path(options.mount_path.as_deref().unwrap_or(DEFAULT_MOUNT_PATH));
	let server_url = format!("http://localhost:{port}{}", mount_path.trim_end_matches('/'));
	BackendConfig {
		port,
		server_url,
		app_id: options.app_id.clone().unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
		master_key: options
			.master_key
			.clone()
			.unwrap_or_else(|| DEFAULT_MASTER_KEY.to_string()),
		database_uri: options
			.database_uri
			.clone()
			.unwrap_or_else(|| config.database_uri.clone()),
		mount_path,
	}
}

/// Arguments appended to the configured backend command.
pub fn backend_args(config: &BackendConfig) -> Vec<String> {
	vec![
		"--appId".to_string(),
		config.app_id.clone(),
		"--masterKey".to_string(),
		config.master_key.clone(),
		"--databaseURI".to_string(),
		config.database_uri.clone(),
		"--port".to_string(),
		config.port.to_string(),
		"--mountPath".to_string(),
		config.mount_path.clone(),
		"--serverURL".to_string(),
		config.server_url.clone(),
	]
}

/// Spawns the backend and waits until its health endpoint answers.
///
/// The child is killed if it exits early or never becomes healthy.
pub async fn spawn_backend(
	backend: BackendConfig,
	orchestrator: &OrchestratorConfig,
	timeout: Duration,
) -> Result<BackendProcess> {
	let (program, leading) = orchestrator
		.backend_command
		.split_first()
		.ok_or_else(|| Error::InvalidArgument("backend command is empty".to_string()))?;
	let mut args = leading.to_vec();
	args.extend(backend_args(&backend));

	let (mut child, output) = process::spawn_captured("backend", program, &args)?;
	let url = health_url(backend.port, &backend.mount_path);

	let outcome = tokio::select! {
		healthy = poll_health_url(&url, timeout, orchestrator.health_interval) => healthy,
		status = child.wait() => Err(Error::ProcessExited {
			service: "backend",
			status: describe_exit(status),
			output: Vec::new(),
		}),
	};

	match outcome {
		Ok(()) => Ok(BackendProcess {
			config: backend,
			child,
			output,
		}),
		Err(err) => {
			let _ = process::kill(&mut child).await;
			Err(Error::StartupFailed {
				service: "backend",
				source: Box::new(err),
				output: output.settle(OUTPUT_SETTLE).await,
			})
		}
	}
}

fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
	match status {
		Ok(status) => status.to_string(),
		Err(err) => format!("unknown status ({err})"),
	}
}
