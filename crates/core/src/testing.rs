//! In-memory browser backend for tests.
//!
//! [`FakeBackend`] stands in for Chromium: every launch yields a
//! [`FakeBrowserControl`] that can push page events, simulate a crash and
//! report what the session did to its page.
//!
//! Selectors starting with `#missing` never match.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashctl_protocol::{ElementBounds, ElementInfo, WaitUntil, now_ms};
use dashctl_runtime::PageEvent;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::session::{BrowserBackend, BrowserDriver, LaunchedBrowser, PageDriver, ResolvedOptions};

/// Eight-byte PNG signature returned by fake screenshots.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

const MISSING_PREFIX: &str = "#missing";

#[derive(Default)]
struct BackendState {
	launches: Vec<FakeBrowserControl>,
	fail_next: Option<String>,
	launch_delay: Option<Duration>,
}

/// Launches fake browsers.
#[derive(Clone, Default)]
pub struct FakeBackend {
	state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next launch fail with `message`.
	pub fn fail_next_launch(&self, message: &str) {
		self.state.lock().fail_next = Some(message.to_string());
	}

	/// Delays every launch, to hold capacity reservations open.
	pub fn set_launch_delay(&self, delay: Duration) {
		self.state.lock().launch_delay = Some(delay);
	}

	/// Controls for every browser launched so far, in launch order.
	pub fn launches(&self) -> Vec<FakeBrowserControl> {
		self.state.lock().launches.clone()
	}

	pub fn last_launch(&self) -> Option<FakeBrowserControl> {
		self.state.lock().launches.last().cloned()
	}
}

#[async_trait]
impl BrowserBackend for FakeBackend {
	async fn launch(&self, options: &ResolvedOptions) -> Result<LaunchedBrowser> {
		let (fail, delay) = {
			let mut state = self.state.lock();
			(state.fail_next.take(), state.launch_delay)
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if let Some(message) = fail {
			return Err(Error::LaunchFailed(message));
		}

		let (events_tx, events) = mpsc::unbounded_channel();
		let (disconnect_tx, disconnected) = oneshot::channel();
		let control = FakeBrowserControl {
			inner: Arc::new(ControlInner {
				options: options.clone(),
				events_tx,
				disconnect_tx: Mutex::new(Some(disconnect_tx)),
				page_closed: AtomicBool::new(false),
				browser_closed: AtomicBool::new(false),
				url: Mutex::new("about:blank".to_string()),
				calls: Mutex::new(Vec::new()),
				elements: Mutex::new(Vec::new()),
			}),
		};
		self.state.lock().launches.push(control.clone());

		Ok(LaunchedBrowser {
			browser: Box::new(FakeBrowser(control.clone())),
			page: Arc::new(FakePage(control)),
			events,
			disconnected,
		})
	}
}

struct ControlInner {
	options: ResolvedOptions,
	events_tx: mpsc::UnboundedSender<PageEvent>,
	disconnect_tx: Mutex<Option<oneshot::Sender<()>>>,
	page_closed: AtomicBool,
	browser_closed: AtomicBool,
	url: Mutex<String>,
	calls: Mutex<Vec<String>>,
	elements: Mutex<Vec<ElementInfo>>,
}

/// Test-side handle to one fake browser.
#[derive(Clone)]
pub struct FakeBrowserControl {
	inner: Arc<ControlInner>,
}

impl FakeBrowserControl {
	pub fn options(&self) -> &ResolvedOptions {
		&self.inner.options
	}

	/// Pushes a page event as if the page produced it.
	pub fn emit(&self, event: PageEvent) {
		let _ = self.inner.events_tx.send(event);
	}

	pub fn emit_console(&self, level: &str, text: &str) {
		self.emit(PageEvent::Console {
			level: level.to_string(),
			text: text.to_string(),
			timestamp: now_ms(),
		});
	}

	/// Simulates the browser process dying.
	pub fn crash(&self) {
		if let Some(tx) = self.inner.disconnect_tx.lock().take() {
			let _ = tx.send(());
		}
	}

	pub fn is_page_closed(&self) -> bool {
		self.inner.page_closed.load(Ordering::SeqCst)
	}

	pub fn is_browser_closed(&self) -> bool {
		self.inner.browser_closed.load(Ordering::SeqCst)
	}

	/// Page operations in call order, e.g. `click #save`.
	pub fn calls(&self) -> Vec<String> {
		self.inner.calls.lock().clone()
	}

	/// Elements returned by `query` for any selector that matches.
	pub fn set_elements(&self, elements: Vec<ElementInfo>) {
		*self.inner.elements.lock() = elements;
	}

	fn record(&self, call: String) {
		self.inner.calls.lock().push(call);
	}

	fn ensure_open(&self) -> dashctl_runtime::Result<()> {
		if self.is_page_closed() || self.is_browser_closed() {
			return Err(dashctl_runtime::Error::TargetClosed("fake page closed".to_string()));
		}
		Ok(())
	}

	fn check_selector(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()> {
		if selector.starts_with(MISSING_PREFIX) {
			return Err(dashctl_runtime::Error::Timeout(format!(
				"selector '{selector}' did not appear within {}ms",
				timeout.as_millis()
			)));
		}
		Ok(())
	}
}

struct FakeBrowser(FakeBrowserControl);

#[async_trait]
impl BrowserDriver for FakeBrowser {
	async fn close(&self) -> dashctl_runtime::Result<()> {
		self.0.inner.browser_closed.store(true, Ordering::SeqCst);
		self.0.crash();
		Ok(())
	}
}

struct FakePage(FakeBrowserControl);

#[async_trait]
impl PageDriver for FakePage {
	fn url(&self) -> String {
		self.0.inner.url.lock().clone()
	}

	async fn goto(&self, url: &str, _wait_until: WaitUntil, _timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.ensure_open()?;
		self.0.record(format!("goto {url}"));
		*self.0.inner.url.lock() = url.to_string();
		self.0.emit(PageEvent::Navigation {
			url: url.to_string(),
			timestamp: now_ms(),
		});
		Ok(())
	}

	async fn reload(&self, _wait_until: WaitUntil, _timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.ensure_open()?;
		self.0.record("reload".to_string());
		Ok(())
	}

	async fn click(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.ensure_open()?;
		self.0.check_selector(selector, timeout)?;
		self.0.record(format!("click {selector}"));
		Ok(())
	}

	async fn type_text(
		&self,
		selector: &str,
		text: &str,
		clear: bool,
		timeout: Duration,
	) -> dashctl_runtime::Result<()> {
		self.0.ensure_open()?;
		self.0.check_selector(selector, timeout)?;
		let mode = if clear { "replace" } else { "type" };
		self.0.record(format!("{mode} {selector} {text}"));
		Ok(())
	}

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> dashctl_runtime::Result<()> {
		self.0.ensure_open()?;
		self.0.check_selector(selector, timeout)?;
		self.0.record(format!("wait {selector}"));
		Ok(())
	}

	async fn evaluate(&self, script: &str) -> dashctl_runtime::Result<Value> {
		self.0.ensure_open()?;
		self.0.record(format!("evaluate {script}"));
		if script.contains("throw") {
			return Err(dashctl_runtime::Error::Evaluation(format!("Error: {script}")));
		}
		Ok(json!({"script": script}))
	}

	async fn query(&self, selector: &str) -> dashctl_runtime::Result<Vec<ElementInfo>> {
		self.0.ensure_open()?;
		self.0.record(format!("query {selector}"));
		if selector.starts_with(MISSING_PREFIX) {
			return Ok(Vec::new());
		}
		let configured = self.0.inner.elements.lock().clone();
		if !configured.is_empty() {
			return Ok(configured);
		}
		Ok(vec![ElementInfo {
			tag: "div".to_string(),
			id: None,
			classes: Vec::new(),
			text: String::new(),
			visible: true,
			bounds: Some(ElementBounds {
				x: 0.0,
				y: 0.0,
				width: 10.0,
				height: 10.0,
			}),
		}])
	}

	async fn screenshot(&self, full_page: bool) -> dashctl_runtime::Result<Vec<u8>> {
		self.0.ensure_open()?;
		self.0.record(format!("screenshot full_page={full_page}"));
		Ok(PNG_SIGNATURE.to_vec())
	}

	async fn close(&self) -> dashctl_runtime::Result<()> {
		self.0.inner.page_closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}
