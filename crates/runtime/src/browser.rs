//! Browser process lifecycle.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::launcher::{LaunchOptions, browser_args, find_browser_executable, read_devtools_endpoint};
use crate::page::Page;
use crate::transport::WebSocketTransport;

/// How long [`Browser::close`] waits for a clean exit before killing.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A launched Chromium process and its DevTools connection.
///
/// Dropping the browser kills the process and removes its temporary profile.
pub struct Browser {
	connection: Arc<Connection>,
	process: Mutex<Option<Child>>,
	_profile: TempDir,
}

impl Browser {
	/// Launches Chromium and connects to its DevTools endpoint.
	///
	/// # Errors
	///
	/// Returns [`Error::BrowserNotFound`] when no executable is found and
	/// [`Error::LaunchFailed`] when the process exits or never exposes
	/// DevTools.
	pub async fn launch(options: LaunchOptions) -> Result<Self> {
		let executable = find_browser_executable(options.executable.as_deref())?;
		let profile = tempfile::Builder::new()
			.prefix("dashctl-profile-")
			.tempdir()
			.map_err(|e| Error::LaunchFailed(format!("failed to create profile dir: {e}")))?;

		let mut child = Command::new(&executable)
			.args(browser_args(&options, profile.path()))
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("failed to spawn {}: {e}", executable.display())))?;

		let stderr = child
			.stderr
			.take()
			.ok_or_else(|| Error::LaunchFailed("browser stderr unavailable".to_string()))?;

		let (endpoint, reader) = match read_devtools_endpoint(stderr, options.startup_timeout).await {
			Ok(found) => found,
			Err(err) => {
				let _ = child.start_kill();
				return Err(err);
			}
		};

		// Keep draining stderr so the browser never blocks on a full pipe.
		tokio::spawn(async move {
			let mut lines = reader.lines();
			while let Ok(Some(line)) = lines.next_line().await {
				tracing::trace!(target = "dashctl.cdp", %line, "browser stderr");
			}
		});

		let parts = match WebSocketTransport::connect(&endpoint).await {
			Ok(parts) => parts,
			Err(err) => {
				let _ = child.start_kill();
				return Err(err);
			}
		};
		let connection = Connection::new(parts.outbound_tx);
		tokio::spawn(Arc::clone(&connection).run(parts.inbound_rx));

		info!(
			target = "dashctl.cdp",
			pid = child.id(),
			headless = options.headless,
			%endpoint,
			"browser launched"
		);

		Ok(Self {
			connection,
			process: Mutex::new(Some(child)),
			_profile: profile,
		})
	}

	/// Opens a new page target and attaches to it.
	pub async fn new_page(&self, width: u32, height: u32) -> Result<Page> {
		let created = self
			.connection
			.send("Target.createTarget", json!({"url": "about:blank"}), None)
			.await?;
		let target_id = created
			.get("targetId")
			.and_then(|v| v.as_str())
			.ok_or_else(|| Error::ProtocolError("Target.createTarget returned no targetId".to_string()))?;
		Page::attach(Arc::clone(&self.connection), target_id, width, height).await
	}

	/// Returns a receiver that flips to `true` when the DevTools connection drops.
	pub fn disconnected(&self) -> watch::Receiver<bool> {
		self.connection.closed()
	}

	pub fn is_connected(&self) -> bool {
		!self.connection.is_closed()
	}

	/// Closes the browser, killing it if it does not exit within the grace period.
	pub async fn close(&self) -> Result<()> {
		if self.is_connected() {
			if let Err(err) = self.connection.send("Browser.close", json!({}), None).await {
				debug!(target = "dashctl.cdp", error = %err, "Browser.close failed");
			}
		}

		let Some(mut child) = self.process.lock().await.take() else {
			return Ok(());
		};

		match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
			Ok(status) => {
				debug!(target = "dashctl.cdp", status = ?status.ok(), "browser exited");
				Ok(())
			}
			Err(_) => {
				warn!(target = "dashctl.cdp", "browser did not exit in time; killing");
				child.kill().await?;
				Ok(())
			}
		}
	}
}
