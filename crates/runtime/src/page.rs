//! A single page target driven through a flattened DevTools session.

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashctl_protocol::{ElementInfo, WaitUntil};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::connection::{CdpEvent, Connection};
use crate::error::{Error, Result};
use crate::events::{NetworkTracker, PageEvent};

/// Interval between selector probes.
const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// Counts of load-state events seen on the top frame.
#[derive(Debug, Clone, Copy, Default)]
struct Lifecycle {
	load: u64,
	dom_content_loaded: u64,
}

impl Lifecycle {
	fn count(&self, wait_until: WaitUntil) -> u64 {
		match wait_until {
			WaitUntil::Load => self.load,
			WaitUntil::DomContentLoaded => self.dom_content_loaded,
		}
	}
}

struct PageInner {
	connection: Arc<Connection>,
	target_id: String,
	session_id: String,
	url: Mutex<String>,
	lifecycle: watch::Sender<Lifecycle>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
}

/// Handle to one attached page.
///
/// Cheap to clone; all clones drive the same target.
#[derive(Clone)]
pub struct Page {
	inner: Arc<PageInner>,
}

impl Page {
	/// Attaches to `target_id`, enables the domains the page needs and sets
	/// the viewport.
	pub async fn attach(connection: Arc<Connection>, target_id: &str, width: u32, height: u32) -> Result<Self> {
		let attached = connection
			.send(
				"Target.attachToTarget",
				json!({"targetId": target_id, "flatten": true}),
				None,
			)
			.await?;
		let session_id = attached
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError("Target.attachToTarget returned no sessionId".to_string()))?
			.to_string();

		let cdp_events = connection.subscribe_session(&session_id);
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (lifecycle, _) = watch::channel(Lifecycle::default());

		let inner = Arc::new(PageInner {
			connection,
			target_id: target_id.to_string(),
			session_id,
			url: Mutex::new("about:blank".to_string()),
			lifecycle,
			events_rx: Mutex::new(Some(events_rx)),
		});
		tokio::spawn(pump_events(Arc::downgrade(&inner), cdp_events, events_tx));

		let page = Self { inner };
		for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
			page.send(domain, json!({})).await?;
		}
		page.send(
			"Emulation.setDeviceMetricsOverride",
			json!({"width": width, "height": height, "deviceScaleFactor": 1, "mobile": false}),
		)
		.await?;

		debug!(target = "dashctl.cdp", target_id, session_id = %page.inner.session_id, "page attached");
		Ok(page)
	}

	async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.inner
			.connection
			.send(method, params, Some(&self.inner.session_id))
			.await
	}

	/// Takes the page event stream. Only the first call returns a receiver.
	pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>> {
		self.inner.events_rx.lock().take()
	}

	/// Last known top-frame URL.
	pub fn url(&self) -> String {
		self.inner.url.lock().clone()
	}

	pub fn target_id(&self) -> &str {
		&self.inner.target_id
	}

	/// Navigates and waits for `wait_until`.
	///
	/// # Errors
	///
	/// [`Error::Navigation`] when the browser refuses the URL and
	/// [`Error::NavigationTimeout`] when the load state is not reached within
	/// `timeout`. The navigation itself keeps going after a timeout.
	pub async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
		let mut lifecycle = self.inner.lifecycle.subscribe();
		let before = lifecycle.borrow_and_update().count(wait_until);

		let navigate = async {
			let result = self.send("Page.navigate", json!({"url": url})).await?;
			if let Some(reason) = result.get("errorText").and_then(Value::as_str).filter(|s| !s.is_empty()) {
				return Err(Error::Navigation {
					url: url.to_string(),
					reason: reason.to_string(),
				});
			}
			// Same-document navigations have no loader and fire no load events.
			if result.get("loaderId").is_none() {
				return Ok(());
			}
			wait_for_lifecycle(&mut lifecycle, wait_until, before).await
		};

		tokio::time::timeout(timeout, navigate)
			.await
			.map_err(|_| Error::NavigationTimeout {
				url: url.to_string(),
				duration_ms: timeout.as_millis() as u64,
			})?
	}

	/// Reloads the page and waits for `wait_until`.
	pub async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
		let mut lifecycle = self.inner.lifecycle.subscribe();
		let before = lifecycle.borrow_and_update().count(wait_until);

		let reload = async {
			self.send("Page.reload", json!({})).await?;
			wait_for_lifecycle(&mut lifecycle, wait_until, before).await
		};

		tokio::time::timeout(timeout, reload)
			.await
			.map_err(|_| Error::NavigationTimeout {
				url: self.url(),
				duration_ms: timeout.as_millis() as u64,
			})?
	}

	/// Evaluates `expression`, awaiting promises, and returns the value.
	pub async fn evaluate(&self, expression: &str) -> Result<Value> {
		let result = self
			.send(
				"Runtime.evaluate",
				json!({
					"expression": expression,
					"returnByValue": true,
					"awaitPromise": true,
					"userGesture": true,
				}),
			)
			.await?;

		if let Some(details) = result.get("exceptionDetails") {
			let message = details
				.pointer("/exception/description")
				.and_then(Value::as_str)
				.or_else(|| details.get("text").and_then(Value::as_str))
				.unwrap_or("script threw");
			return Err(Error::Evaluation(message.to_string()));
		}

		Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}

	/// Polls until `selector` matches an element.
	pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
		let probe = format!("document.querySelector({}) !== null", js_string(selector)?);
		let wait = async {
			loop {
				if self.evaluate(&probe).await? == Value::Bool(true) {
					return Ok::<_, Error>(());
				}
				tokio::time::sleep(SELECTOR_POLL).await;
			}
		};
		tokio::time::timeout(timeout, wait).await.map_err(|_| {
			Error::Timeout(format!(
				"selector '{selector}' did not appear within {}ms",
				timeout.as_millis()
			))
		})?
	}

	/// Clicks the centre of the first element matching `selector`.
	pub async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
		self.wait_for_selector(selector, timeout).await?;

		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				if (!el) return null;
				el.scrollIntoView({{ block: "center", inline: "center" }});
				const r = el.getBoundingClientRect();
				return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }};
			}})()"#,
			sel = js_string(selector)?
		);
		let point = self.evaluate(&script).await?;
		let (Some(x), Some(y)) = (
			point.get("x").and_then(Value::as_f64),
			point.get("y").and_then(Value::as_f64),
		) else {
			return Err(Error::ElementNotFound(selector.to_string()));
		};

		self.send("Input.dispatchMouseEvent", json!({"type": "mouseMoved", "x": x, "y": y}))
			.await?;
		for kind in ["mousePressed", "mouseReleased"] {
			self.send(
				"Input.dispatchMouseEvent",
				json!({"type": kind, "x": x, "y": y, "button": "left", "clickCount": 1}),
			)
			.await?;
		}
		Ok(())
	}

	/// Focuses the element matching `selector` and inserts `text`.
	pub async fn type_text(&self, selector: &str, text: &str, clear: bool, timeout: Duration) -> Result<()> {
		self.wait_for_selector(selector, timeout).await?;

		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				if (!el) return false;
				el.focus();
				if ({clear}) {{
					if ("value" in el) {{
						el.value = "";
						el.dispatchEvent(new Event("input", {{ bubbles: true }}));
					}} else if (el.isContentEditable) {{
						el.textContent = "";
					}}
				}}
				return true;
			}})()"#,
			sel = js_string(selector)?,
		);
		if self.evaluate(&script).await? != Value::Bool(true) {
			return Err(Error::ElementNotFound(selector.to_string()));
		}
		self.send("Input.insertText", json!({"text": text})).await?;
		Ok(())
	}

	/// Describes every element matching `selector`.
	pub async fn query(&self, selector: &str) -> Result<Vec<ElementInfo>> {
		let script = format!(
			r#"Array.from(document.querySelectorAll({sel})).map((el) => {{
				const r = el.getBoundingClientRect();
				const style = window.getComputedStyle(el);
				return {{
					tag: el.tagName.toLowerCase(),
					id: el.id || null,
					classes: Array.from(el.classList),
					text: (el.innerText || el.textContent || "").trim().slice(0, 500),
					visible: r.width > 0 && r.height > 0 && style.visibility !== "hidden" && style.display !== "none",
					bounds: {{ x: r.x, y: r.y, width: r.width, height: r.height }},
				}};
			}})"#,
			sel = js_string(selector)?
		);
		let value = self.evaluate(&script).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// Captures a PNG of the viewport, or of the whole document when `full_page`.
	pub async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
		let mut params = json!({"format": "png"});
		if full_page {
			let metrics = self.send("Page.getLayoutMetrics", json!({})).await?;
			let size = metrics
				.get("cssContentSize")
				.or_else(|| metrics.get("contentSize"))
				.ok_or_else(|| Error::ProtocolError("layout metrics without content size".to_string()))?;
			let width = size.get("width").and_then(Value::as_f64).unwrap_or(0.0);
			let height = size.get("height").and_then(Value::as_f64).unwrap_or(0.0);
			params["clip"] = json!({"x": 0, "y": 0, "width": width, "height": height, "scale": 1});
			params["captureBeyondViewport"] = json!(true);
		}

		let shot = self.send("Page.captureScreenshot", params).await?;
		let data = shot
			.get("data")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError("screenshot without data".to_string()))?;
		STANDARD
			.decode(data)
			.map_err(|e| Error::ProtocolError(format!("invalid screenshot payload: {e}")))
	}

	/// Closes the page target and stops its event stream.
	pub async fn close(&self) -> Result<()> {
		let result = self
			.inner
			.connection
			.send("Target.closeTarget", json!({"targetId": self.inner.target_id}), None)
			.await;
		self.inner.connection.unsubscribe_session(&self.inner.session_id);
		result.map(|_| ())
	}
}

async fn wait_for_lifecycle(
	lifecycle: &mut watch::Receiver<Lifecycle>,
	wait_until: WaitUntil,
	before: u64,
) -> Result<()> {
	lifecycle
		.wait_for(|state| state.count(wait_until) > before)
		.await
		.map(|_| ())
		.map_err(|_| Error::TargetClosed("page closed while waiting for load".to_string()))
}

/// Quotes `value` as a JavaScript string literal.
fn js_string(value: &str) -> Result<String> {
	Ok(serde_json::to_string(value)?)
}

async fn pump_events(
	page: Weak<PageInner>,
	mut cdp_events: mpsc::UnboundedReceiver<CdpEvent>,
	events_tx: mpsc::UnboundedSender<PageEvent>,
) {
	let mut tracker = NetworkTracker::new();
	while let Some(event) = cdp_events.recv().await {
		let Some(page) = page.upgrade() else { break };
		match event.method.as_str() {
			"Page.loadEventFired" => page.lifecycle.send_modify(|l| l.load += 1),
			"Page.domContentEventFired" => page.lifecycle.send_modify(|l| l.dom_content_loaded += 1),
			_ => {}
		}
		if let Some(page_event) = tracker.translate(&event.method, &event.params) {
			if let PageEvent::Navigation { url, .. } = &page_event {
				*page.url.lock() = url.clone();
			}
			trace!(target = "dashctl.cdp", ?page_event, "page event");
			// The receiver may never be taken; telemetry is best-effort.
			let _ = events_tx.send(page_event);
		}
	}
	trace!(target = "dashctl.cdp", "page event pump finished");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selectors_are_quoted_for_scripts() {
		assert_eq!(js_string(r#"a[href="x"]"#).unwrap(), r#""a[href=\"x\"]""#);
	}

	#[test]
	fn lifecycle_counts_follow_wait_state() {
		let l = Lifecycle {
			load: 2,
			dom_content_loaded: 5,
		};
		assert_eq!(l.count(WaitUntil::Load), 2);
		assert_eq!(l.count(WaitUntil::DomContentLoaded), 5);
	}

	async fn attached_page() -> (Page, mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>) {
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
		let connection = Connection::new(outbound_tx);
		tokio::spawn(Arc::clone(&connection).run(inbound_rx));

		let responder = inbound_tx.clone();
		let attach = tokio::spawn(Page::attach(connection, "T1", 800, 600));
		// attach, three enables, viewport
		for _ in 0..5 {
			let raw = outbound_rx.recv().await.unwrap();
			let req: crate::connection::Request = serde_json::from_str(&raw).unwrap();
			let result = if req.method == "Target.attachToTarget" {
				json!({"sessionId": "S1"})
			} else {
				json!({})
			};
			responder.send(json!({"id": req.id, "result": result}).to_string()).unwrap();
		}
		let page = attach.await.unwrap().unwrap();
		(page, outbound_rx, inbound_tx)
	}

	#[tokio::test]
	async fn navigation_waits_for_load_event() {
		let (page, mut outbound, inbound) = attached_page().await;

		let nav = tokio::spawn({
			let page = page.clone();
			async move { page.goto("http://x/apps", WaitUntil::Load, Duration::from_secs(5)).await }
		});

		let raw = outbound.recv().await.unwrap();
		let req: crate::connection::Request = serde_json::from_str(&raw).unwrap();
		assert_eq!(req.method, "Page.navigate");
		assert_eq!(req.session_id.as_deref(), Some("S1"));
		inbound
			.send(json!({"id": req.id, "result": {"frameId": "F", "loaderId": "L"}, "sessionId": "S1"}).to_string())
			.unwrap();
		inbound
			.send(json!({"method": "Page.frameNavigated", "params": {"frame": {"id": "F", "url": "http://x/apps"}}, "sessionId": "S1"}).to_string())
			.unwrap();
		inbound
			.send(json!({"method": "Page.loadEventFired", "params": {}, "sessionId": "S1"}).to_string())
			.unwrap();

		nav.await.unwrap().unwrap();
		assert_eq!(page.url(), "http://x/apps");

		let mut events = page.take_events().unwrap();
		assert!(matches!(events.recv().await, Some(PageEvent::Navigation { .. })));
		assert!(page.take_events().is_none());
	}

	#[tokio::test]
	async fn navigation_error_text_is_reported() {
		let (page, mut outbound, inbound) = attached_page().await;
		let nav = tokio::spawn({
			let page = page.clone();
			async move { page.goto("http://nope", WaitUntil::Load, Duration::from_secs(5)).await }
		});
		let req: crate::connection::Request = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
		inbound
			.send(json!({"id": req.id, "result": {"frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED"}}).to_string())
			.unwrap();
		let err = nav.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::Navigation { ref reason, .. } if reason.contains("NAME_NOT_RESOLVED")));
	}

	#[tokio::test]
	async fn navigation_times_out_without_load() {
		let (page, mut outbound, inbound) = attached_page().await;
		let nav = tokio::spawn({
			let page = page.clone();
			async move { page.goto("http://slow", WaitUntil::Load, Duration::from_millis(50)).await }
		});
		let req: crate::connection::Request = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
		inbound
			.send(json!({"id": req.id, "result": {"frameId": "F", "loaderId": "L"}}).to_string())
			.unwrap();
		let err = nav.await.unwrap().unwrap_err();
		assert!(err.is_timeout(), "{err:?}");
	}

	#[tokio::test]
	async fn evaluation_exception_becomes_error() {
		let (page, mut outbound, inbound) = attached_page().await;
		let eval = tokio::spawn({
			let page = page.clone();
			async move { page.evaluate("throw new Error('boom')").await }
		});
		let req: crate::connection::Request = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
		assert_eq!(req.params["awaitPromise"], true);
		inbound
			.send(
				json!({"id": req.id, "result": {
					"result": {"type": "object"},
					"exceptionDetails": {"text": "Uncaught", "exception": {"description": "Error: boom"}}
				}})
				.to_string(),
			)
			.unwrap();
		let err = eval.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::Evaluation(ref m) if m == "Error: boom"));
	}
}
