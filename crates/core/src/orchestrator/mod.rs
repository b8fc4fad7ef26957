//! Supervision of the backend API process and the dashboard server.
//!
//! At most one instance of each runs per orchestrator. Both follow the same
//! phase machine:
//!
//! ```text
//! Stopped ──start──▶ Starting ──healthy──▶ Healthy ──stop──▶ Stopping ──▶ Stopped
//!                       │
//!                       └──failure──▶ Stopped
//! ```

pub mod backend;
pub mod dashboard;
pub mod process;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use dashctl_protocol::{
	BackendConfig, BackendOptions, BackendStatus, DashboardApp, DashboardAppConfig, DashboardInfo, DashboardOptions,
	DashboardStatus, ServersStatus,
};
use parking_lot::Mutex;
use tracing::{info, warn};

pub use self::backend::BackendProcess;
pub use self::dashboard::DashboardServer;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::probe::{available_port, is_port_open};

/// App name shown in the dashboard when none is given.
pub const DEFAULT_APP_NAME: &str = "Development";

/// Supervision phase of one managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessPhase {
	#[default]
	Stopped,
	Starting,
	Healthy,
	Stopping,
}

#[derive(Default)]
struct Snapshot {
	backend_phase: ProcessPhase,
	backend: Option<BackendConfig>,
	dashboard_phase: ProcessPhase,
	dashboard: Option<DashboardInfo>,
}

struct OrchestratorInner {
	config: OrchestratorConfig,
	/// Held across start and stop so those never interleave.
	backend: tokio::sync::Mutex<Option<BackendProcess>>,
	dashboard: tokio::sync::Mutex<Option<DashboardServer>>,
	snapshot: Mutex<Snapshot>,
}

/// Starts, health-checks and stops the development servers.
///
/// Cheap to clone; clones share the same servers.
#[derive(Clone)]
pub struct ServerOrchestrator {
	inner: Arc<OrchestratorInner>,
}

impl ServerOrchestrator {
	pub fn new(config: OrchestratorConfig) -> Self {
		Self {
			inner: Arc::new(OrchestratorInner {
				config,
				backend: tokio::sync::Mutex::new(None),
				dashboard: tokio::sync::Mutex::new(None),
				snapshot: Mutex::new(Snapshot::default()),
			}),
		}
	}

	pub fn config(&self) -> &OrchestratorConfig {
		&self.inner.config
	}

	fn set_backend(&self, phase: ProcessPhase, config: Option<BackendConfig>) {
		let mut snapshot = self.inner.snapshot.lock();
		snapshot.backend_phase = phase;
		snapshot.backend = config;
	}

	fn set_dashboard(&self, phase: ProcessPhase, info: Option<DashboardInfo>) {
		let mut snapshot = self.inner.snapshot.lock();
		snapshot.dashboard_phase = phase;
		snapshot.dashboard = info;
	}

	pub fn backend_phase(&self) -> ProcessPhase {
		self.reap_exited_backend();
		self.inner.snapshot.lock().backend_phase
	}

	pub fn dashboard_phase(&self) -> ProcessPhase {
		self.inner.snapshot.lock().dashboard_phase
	}

	/// Starts the backend and waits for its health endpoint.
	///
	/// A running backend is reused as is. An explicit port that is already
	/// open fails with [`Error::PortInUse`] before anything is spawned.
	pub async fn start_backend(&self, options: BackendOptions) -> Result<BackendConfig> {
		let mut slot = self.inner.backend.lock().await;
		if let Some(existing) = slot.as_mut() {
			if existing.is_alive() {
				info!(target = "dashctl.servers", port = existing.config.port, "backend already running");
				return Ok(existing.config.clone());
			}
			warn!(target = "dashctl.servers", port = existing.config.port, "backend exited; restarting");
			*slot = None;
			self.set_backend(ProcessPhase::Stopped, None);
		}

		let port = match options.port.or(self.inner.config.backend_port) {
			Some(port) => {
				if is_port_open(port, "127.0.0.1").await {
					return Err(Error::PortInUse(port));
				}
				port
			}
			None => available_port().await?,
		};
		let config = backend::resolve_config(&options, port, &self.inner.config);
		let timeout = options
			.timeout
			.map(Duration::from_millis)
			.unwrap_or(self.inner.config.health_timeout);

		info!(
			target = "dashctl.servers",
			port,
			mount_path = %config.mount_path,
			timeout_ms = timeout.as_millis() as u64,
			"starting backend"
		);
		self.set_backend(ProcessPhase::Starting, None);
		match backend::spawn_backend(config, &self.inner.config, timeout).await {
			Ok(process) => {
				let config = process.config.clone();
				info!(target = "dashctl.servers", server_url = %config.server_url, "backend healthy");
				self.set_backend(ProcessPhase::Healthy, Some(config.clone()));
				*slot = Some(process);
				Ok(config)
			}
			Err(err) => {
				warn!(target = "dashctl.servers", error = %err, "backend failed to start");
				self.set_backend(ProcessPhase::Stopped, None);
				Err(err)
			}
		}
	}

	/// Serves the dashboard against `backend`.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] when no backend config is given (nothing is
	/// bound), [`Error::PortInUse`] or [`Error::Io`] when the bind fails.
	pub async fn start_dashboard(
		&self,
		backend: Option<&BackendConfig>,
		options: DashboardOptions,
	) -> Result<DashboardInfo> {
		let backend = backend.ok_or_else(|| {
			Error::InvalidArgument("a backend config is required to start the dashboard".to_string())
		})?;

		let mut slot = self.inner.dashboard.lock().await;
		if let Some(existing) = slot.as_ref() {
			if existing.is_running() {
				info!(target = "dashctl.servers", port = existing.info().port, "dashboard already running");
				return Ok(existing.info().clone());
			}
			*slot = None;
		}

		let app_config = DashboardAppConfig {
			apps: vec![DashboardApp {
				server_url: backend.server_url.clone(),
				app_id: backend.app_id.clone(),
				master_key: backend.master_key.clone(),
				app_name: options.app_name.unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
			}],
			allow_insecure_http: true,
		};
		let port = options.port.or(self.inner.config.dashboard_port).unwrap_or(0);

		self.set_dashboard(ProcessPhase::Starting, None);
		match DashboardServer::bind(app_config, port, self.inner.config.dashboard_assets.as_deref()).await {
			Ok(server) => {
				let info = server.info().clone();
				info!(target = "dashctl.servers", url = %info.url, backend = %backend.server_url, "dashboard listening");
				self.set_dashboard(ProcessPhase::Healthy, Some(info.clone()));
				*slot = Some(server);
				Ok(info)
			}
			Err(err) => {
				warn!(target = "dashctl.servers", port, error = %err, "dashboard failed to bind");
				self.set_dashboard(ProcessPhase::Stopped, None);
				Err(err)
			}
		}
	}

	/// Starts the backend, then a dashboard pointed at it.
	pub async fn start_all(
		&self,
		backend: BackendOptions,
		dashboard: DashboardOptions,
	) -> Result<(BackendConfig, DashboardInfo)> {
		let backend = self.start_backend(backend).await?;
		let dashboard = self.start_dashboard(Some(&backend), dashboard).await?;
		Ok((backend, dashboard))
	}

	/// Terminates the backend, escalating to a kill after the grace period.
	///
	/// Resolves immediately when nothing is running.
	pub async fn stop_backend(&self) -> Result<()> {
		let mut slot = self.inner.backend.lock().await;
		let Some(mut process) = slot.take() else {
			return Ok(());
		};
		self.set_backend(ProcessPhase::Stopping, Some(process.config.clone()));
		let result = process::terminate("backend", &mut process.child, self.inner.config.stop_grace).await;
		self.set_backend(ProcessPhase::Stopped, None);
		let status = result?;
		info!(target = "dashctl.servers", %status, "backend stopped");
		Ok(())
	}

	/// Closes the dashboard listener. Resolves immediately when nothing is running.
	pub async fn stop_dashboard(&self) -> Result<()> {
		let mut slot = self.inner.dashboard.lock().await;
		let Some(server) = slot.take() else {
			return Ok(());
		};
		self.set_dashboard(ProcessPhase::Stopping, Some(server.info().clone()));
		server.stop().await;
		self.set_dashboard(ProcessPhase::Stopped, None);
		info!(target = "dashctl.servers", "dashboard stopped");
		Ok(())
	}

	/// Stops both servers concurrently.
	pub async fn stop_all(&self) -> Result<()> {
		let (backend, dashboard) = tokio::join!(self.stop_backend(), self.stop_dashboard());
		backend.and(dashboard)
	}

	/// Moves the backend to `Stopped` if its process exited on its own.
	///
	/// Skipped while a start or stop holds the slot; that call owns the phase.
	fn reap_exited_backend(&self) {
		let Ok(mut slot) = self.inner.backend.try_lock() else {
			return;
		};
		if slot.as_mut().is_some_and(|process| !process.is_alive()) {
			if let Some(process) = slot.take() {
				warn!(target = "dashctl.servers", port = process.config.port, "backend exited unexpectedly");
			}
			self.set_backend(ProcessPhase::Stopped, None);
		}
	}

	pub fn get_status(&self) -> ServersStatus {
		self.reap_exited_backend();
		let snapshot = self.inner.snapshot.lock();
		let backend = match (&snapshot.backend, snapshot.backend_phase) {
			(Some(config), ProcessPhase::Healthy) => BackendStatus {
				running: true,
				port: Some(config.port),
				server_url: Some(config.server_url.clone()),
				app_id: Some(config.app_id.clone()),
			},
			_ => BackendStatus::stopped(),
		};
		let dashboard = match (&snapshot.dashboard, snapshot.dashboard_phase) {
			(Some(info), ProcessPhase::Healthy) => DashboardStatus {
				running: true,
				port: Some(info.port),
				url: Some(info.url.clone()),
			},
			_ => DashboardStatus::stopped(),
		};
		ServersStatus { backend, dashboard }
	}
}
