//! In-process HTTP server hosting the dashboard.

use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use dashctl_protocol::{DashboardAppConfig, DashboardInfo};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Path the dashboard UI fetches its app list from.
pub const CONFIG_PATH: &str = "/parse-dashboard-config.json";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const PLACEHOLDER_INDEX: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Dashboard</title></head>
<body>
<div id="app">Loading dashboard&hellip;</div>
<script>
fetch("/parse-dashboard-config.json")
  .then((r) => r.json())
  .then((config) => {
    const app = document.getElementById("app");
    app.textContent = config.apps.map((a) => a.appName + " @ " + a.serverURL).join("\n");
  });
</script>
</body>
</html>
"#;

/// A bound, running dashboard listener.
pub struct DashboardServer {
	info: DashboardInfo,
	shutdown: Option<oneshot::Sender<()>>,
	task: JoinHandle<()>,
}

impl DashboardServer {
	/// Binds `port` (0 picks a free one) and starts serving.
	///
	/// Returns once the bind has succeeded or failed.
	pub async fn bind(config: DashboardAppConfig, port: u16, assets: Option<&Path>) -> Result<Self> {
		let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::AddrInUse {
				Error::PortInUse(port)
			} else {
				Error::Io(e)
			}
		})?;
		let port = listener.local_addr()?.port();

		let app = router(config, assets);
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
		let task = tokio::spawn(async move {
			let serve = axum::serve(listener, app).with_graceful_shutdown(async {
				let _ = shutdown_rx.await;
			});
			if let Err(err) = serve.await {
				warn!(target = "dashctl.servers", error = %err, "dashboard server error");
			}
		});

		Ok(Self {
			info: DashboardInfo {
				port,
				url: format!("http://localhost:{port}"),
			},
			shutdown: Some(shutdown_tx),
			task,
		})
	}

	pub fn info(&self) -> &DashboardInfo {
		&self.info
	}

	pub fn is_running(&self) -> bool {
		!self.task.is_finished()
	}

	/// Stops accepting connections and waits for the listener to close.
	pub async fn stop(mut self) {
		if let Some(tx) = self.shutdown.take() {
			let _ = tx.send(());
		}
		match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.task).await {
			Ok(_) => debug!(target = "dashctl.servers", port = self.info.port, "dashboard closed"),
			Err(_) => {
				warn!(target = "dashctl.servers", port = self.info.port, "dashboard shutdown timed out; aborting");
				self.task.abort();
			}
		}
	}
}

fn router(config: DashboardAppConfig, assets: Option<&Path>) -> Router {
	let router = Router::new().route(
		CONFIG_PATH,
		get(move || {
			let config = config.clone();
			async move { axum::Json(config) }
		}),
	);
	match assets {
		Some(dir) => {
			// Client-side routes fall back to the SPA entry point.
			let spa = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
			router.fallback_service(spa)
		}
		None => router.route("/", get(|| async { Html(PLACEHOLDER_INDEX) })),
	}
}
