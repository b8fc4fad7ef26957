//! Control server lifecycle: bind, serve, and tear down on signal.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, AppState};

/// Binds `host:port` and serves until SIGINT or SIGTERM.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
	let listener = TcpListener::bind((host, port))
		.await
		.with_context(|| format!("Failed to bind control server to {host}:{port}"))?;
	let signal = shutdown_signal()?;
	run_until(listener, state, async move {
		let name = signal.await;
		info!(target = "dashctl.api", signal = name, "shutting down");
	})
	.await
}

/// Serves on `listener` until `shutdown` resolves, then closes event
/// streams, cleans every session and stops the servers.
pub async fn run_until<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	let addr = listener.local_addr().context("Failed to read control server address")?;
	info!(target = "dashctl.api", %addr, "control server listening");

	// Upgraded sockets are closed before the listener drains.
	let relay = Arc::clone(&state.relay);
	let served = axum::serve(listener, api::router(state.clone()))
		.with_graceful_shutdown(async move {
			shutdown.await;
			relay.shutdown().await;
		})
		.await;

	if let Err(err) = state.shutdown().await {
		warn!(target = "dashctl.api", error = %err, "error during teardown");
	}
	info!(target = "dashctl.api", "control server stopped");
	served.context("Control server error")
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str> + Send> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
	Ok(async move {
		tokio::select! {
			_ = sigterm.recv() => "SIGTERM",
			_ = sigint.recv() => "SIGINT",
		}
	})
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str> + Send> {
	Ok(async {
		if tokio::signal::ctrl_c().await.is_err() {
			std::future::pending::<()>().await;
		}
		"Ctrl+C"
	})
}
