//! [`BrowserBackend`] backed by a locally launched Chromium.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashctl_protocol::{ElementInfo, WaitUntil};
use dashctl_runtime::{Browser, LaunchOptions, Page};
use serde_json::Value;
use tokio::sync::oneshot;

use super::backend::{BrowserBackend, BrowserDriver, LaunchedBrowser, PageDriver, ResolvedOptions};
use crate::error::{Error, Result};

/// Launches one Chromium process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumBackend;

impl ChromiumBackend {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
	async fn launch(&self, options: &ResolvedOptions) -> Result<LaunchedBrowser> {
		let launch = LaunchOptions {
			executable: options.executable.clone(),
			headless: options.headless,
			width: options.width,
			height: options.height,
			..Default::default()
		};

		let browser = Browser::launch(launch)
			.await
			.map_err(|e| Error::LaunchFailed(e.to_string()))?;
		let page = match browser.new_page(options.width, options.height).await {
			Ok(page) => page,
			Err(err) => {
				let _ = browser.close().await;
				return Err(Error::LaunchFailed(err.to_string()));
			}
		};
		let events = page
			.take_events()
			.ok_or_else(|| Error::LaunchFailed("page events already taken".to_string()))?;

		let (disconnect_tx, disconnected) = oneshot::channel();
		let mut closed = browser.disconnected();
		tokio::spawn(async move {
			if closed.wait_for(|closed| *closed).await.is_ok() {
				let _ = disconnect_tx.send(());
			}
		});

		Ok(LaunchedBrowser {
			browser: Box::new(ChromiumBrowser(browser)),
			page: Arc::new(ChromiumPage(page)),
			events,
			disconnected,
		})
	}
}

struct ChromiumBrowser(Browser);

#[async_trait]
impl BrowserDriver for ChromiumBrowser {
	async fn close(&self) -> dashctl_runtime::Result<()> {
		self.0.close().await
	}
}

struct ChromiumPage(Page);

#[async_trait]
impl PageDriver for ChromiumPage {
	fn url(&self) -> String {
		self.0.url()
	}

	async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.goto(url, wait_until, timeout).await
	}

	async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.reload(wait_until, timeout).await
	}

	async fn click(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.click(selector, timeout).await
	}

	async fn type_text(
		&self,
		selector: &str,
		text: &str,
		clear: bool,
		timeout: Duration,
	) -> dashctl_runtime::Result<()> {
		self.0.type_text(selector, text, clear, timeout).await
	}

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.wait_for_selector(selector, timeout).await
	}

	async fn evaluate(&self, script: &str) -> dashctl_runtime::Result<Value> {
		self.0.evaluate(script).await
	}

	async fn query(&self, selector: &str) -> dashctl_runtime::Result<Vec<ElementInfo>> {
		self.0.query(selector).await
	}

	async fn screenshot(&self, full_page: bool) -> dashctl_runtime::Result<Vec<u8>> {
		self.0.screenshot(full_page).await
	}

	async fn close(&self) -> dashctl_runtime::Result<()> {
		self.0.close().await
	}
}
