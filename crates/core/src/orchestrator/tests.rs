use std::time::Duration;

use dashctl_protocol::{BackendOptions, DashboardOptions};
use tokio::net::TcpListener;

use super::*;

fn orchestrator_with(command: &[&str]) -> ServerOrchestrator {
	ServerOrchestrator::new(OrchestratorConfig {
		backend_command: command.iter().map(|s| s.to_string()).collect(),
		health_interval: Duration::from_millis(50),
		stop_grace: Duration::from_secs(2),
		..OrchestratorConfig::default()
	})
}

fn backend_config(port: u16) -> BackendConfig {
	backend::resolve_config(&BackendOptions::default(), port, &OrchestratorConfig::default())
}

#[tokio::test]
async fn test_stop_with_nothing_started_resolves() {
	let orchestrator = orchestrator_with(&["true"]);
	orchestrator.stop_backend().await.unwrap();
	orchestrator.stop_dashboard().await.unwrap();
	orchestrator.stop_all().await.unwrap();
	let status = orchestrator.get_status();
	assert!(!status.backend.running);
	assert!(!status.dashboard.running);
}

#[tokio::test]
async fn test_occupied_backend_port_fails_without_spawning() {
	let holder = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = holder.local_addr().unwrap().port();
	let marker = tempfile::tempdir().unwrap();
	let touched = marker.path().join("spawned");
	let script = format!("touch {}", touched.display());
	let orchestrator = orchestrator_with(&["sh", "-c", &script, "sh"]);

	let err = orchestrator
		.start_backend(BackendOptions {
			port: Some(port),
			..Default::default()
		})
		.await
		.unwrap_err();
	assert!(matches!(err, Error::PortInUse(p) if p == port));
	assert_eq!(err.status_code(), 409);
	assert!(!touched.exists());
	assert_eq!(orchestrator.backend_phase(), ProcessPhase::Stopped);
}

#[tokio::test]
async fn test_dashboard_requires_backend_config() {
	let orchestrator = orchestrator_with(&["true"]);
	let err = orchestrator
		.start_dashboard(None, DashboardOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert!(!orchestrator.get_status().dashboard.running);
}

#[tokio::test]
async fn test_dashboard_exposes_backend_server_url() {
	let orchestrator = orchestrator_with(&["true"]);
	let backend = backend_config(1337);

	let info = orchestrator
		.start_dashboard(Some(&backend), DashboardOptions::default())
		.await
		.unwrap();
	let config: serde_json::Value = reqwest::get(format!("{}{}", info.url, dashboard::CONFIG_PATH))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(config["apps"][0]["serverURL"], backend.server_url);
	assert_eq!(config["apps"][0]["appId"], "testAppId");
	assert_eq!(config["apps"][0]["appName"], DEFAULT_APP_NAME);

	let status = orchestrator.get_status();
	assert!(status.dashboard.running);
	assert_eq!(status.dashboard.port, Some(info.port));

	// Re-entry returns the running instance.
	let again = orchestrator
		.start_dashboard(Some(&backend), DashboardOptions::default())
		.await
		.unwrap();
	assert_eq!(again, info);

	orchestrator.stop_dashboard().await.unwrap();
	assert!(!orchestrator.get_status().dashboard.running);
}

#[cfg(unix)]
#[tokio::test]
async fn test_backend_early_exit_reports_output() {
	let orchestrator = orchestrator_with(&["sh", "-c", "echo 'no database' >&2; exit 3", "sh"]);
	let err = orchestrator
		.start_backend(BackendOptions {
			timeout: Some(5_000),
			..Default::default()
		})
		.await
		.unwrap_err();
	let msg = err.to_string();
	assert!(msg.contains("exit status: 3"), "{msg}");
	assert!(msg.contains("no database"), "{msg}");
	assert_eq!(orchestrator.backend_phase(), ProcessPhase::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_backend_health_timeout_kills_process() {
	let orchestrator = orchestrator_with(&["sh", "-c", "sleep 30", "sh"]);
	let err = orchestrator
		.start_backend(BackendOptions {
			timeout: Some(300),
			..Default::default()
		})
		.await
		.unwrap_err();
	assert!(err.is_timeout(), "{err}");
	assert_eq!(err.status_code(), 408);
	assert!(!orchestrator.get_status().backend.running);
}

/// Installs a healthy long-lived shell as the backend; its health route is
/// served in-process.
#[cfg(unix)]
async fn running_backend() -> (
	ServerOrchestrator,
	BackendConfig,
	tokio::task::JoinHandle<std::io::Result<()>>,
) {
	use axum::Router;
	use axum::routing::get;

	let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let app = Router::new().route("/parse/health", get(|| async { "ok" }));
	let health = tokio::spawn(async move { axum::serve(listener, app).await });

	let orchestrator = orchestrator_with(&["sh", "-c", "sleep 30", "sh"]);
	let config = backend::resolve_config(&BackendOptions::default(), port, orchestrator.config());
	let process = backend::spawn_backend(config.clone(), orchestrator.config(), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(process.config, config);

	*orchestrator.inner.backend.lock().await = Some(process);
	orchestrator.set_backend(ProcessPhase::Healthy, Some(config.clone()));
	(orchestrator, config, health)
}

#[cfg(unix)]
#[tokio::test]
async fn test_backend_start_reuse_and_stop() {
	let (orchestrator, config, health) = running_backend().await;

	let reused = orchestrator.start_backend(BackendOptions::default()).await.unwrap();
	assert_eq!(reused, config);
	let status = orchestrator.get_status();
	assert!(status.backend.running);
	assert_eq!(status.backend.server_url.as_deref(), Some(config.server_url.as_str()));

	orchestrator.stop_backend().await.unwrap();
	assert_eq!(orchestrator.backend_phase(), ProcessPhase::Stopped);
	assert!(!orchestrator.get_status().backend.running);
	health.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_backend_that_dies_is_reported_stopped() {
	let (orchestrator, _config, health) = running_backend().await;
	let pid = orchestrator
		.inner
		.backend
		.lock()
		.await
		.as_ref()
		.and_then(|process| process.child.id())
		.unwrap();
	assert!(orchestrator.get_status().backend.running);

	// SAFETY: plain kill(2) on a child we spawned.
	unsafe {
		libc::kill(pid as libc::pid_t, libc::SIGKILL);
	}

	tokio::time::timeout(Duration::from_secs(5), async {
		while orchestrator.get_status().backend.running {
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("dead backend still reported running");
	assert_eq!(orchestrator.backend_phase(), ProcessPhase::Stopped);
	assert!(orchestrator.inner.backend.lock().await.is_none());
	health.abort();
}
