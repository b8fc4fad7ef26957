//! Seams between the session manager and the browser it supervises.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashctl_protocol::{ElementInfo, WaitUntil};
use dashctl_runtime::PageEvent;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Session options after defaults and overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
	pub headless: bool,
	pub width: u32,
	pub height: u32,
	pub slow_mo: u64,
	pub executable: Option<PathBuf>,
}

/// Everything a launch hands over to the session.
pub struct LaunchedBrowser {
	pub browser: Box<dyn BrowserDriver>,
	pub page: Arc<dyn PageDriver>,
	/// Page telemetry; closes when the page goes away.
	pub events: mpsc::UnboundedReceiver<PageEvent>,
	/// Fires once when the browser connection drops for any reason.
	pub disconnected: oneshot::Receiver<()>,
}

/// Launches browsers for new sessions.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
	async fn launch(&self, options: &ResolvedOptions) -> Result<LaunchedBrowser>;
}

/// Owner of a browser process.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
	async fn close(&self) -> dashctl_runtime::Result<()>;
}

/// Page automation surface used by session handles.
#[async_trait]
pub trait PageDriver: Send + Sync {
	/// Best-effort current URL.
	fn url(&self) -> String;

	async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> dashctl_runtime::Result<()>;

	async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> dashctl_runtime::Result<()>;

	async fn click(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()>;

	async fn type_text(&self, selector: &str, text: &str, clear: bool, timeout: Duration)
	-> dashctl_runtime::Result<()>;

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()>;

	async fn evaluate(&self, script: &str) -> dashctl_runtime::Result<Value>;

	async fn query(&self, selector: &str) -> dashctl_runtime::Result<Vec<ElementInfo>>;

	/// PNG bytes.
	async fn screenshot(&self, full_page: bool) -> dashctl_runtime::Result<Vec<u8>>;

	async fn close(&self) -> dashctl_runtime::Result<()>;
}
