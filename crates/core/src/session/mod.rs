//! Bounded pool of supervised browser sessions.
//!
//! Each session owns one browser and one page. The manager enforces the
//! concurrency cap, evicts idle sessions, reacts to browser crashes and
//! republishes page telemetry to subscribers.
//!
//! # Lifecycle
//!
//! 1. [`SessionManager::create_session`] reserves a slot, launches the
//!    browser, registers the session and emits `session-created`
//! 2. Every [`SessionManager::get_session`] call touches the session
//! 3. [`SessionManager::cleanup`], the idle sweeper, or the crash watcher
//!    closes the page and browser, removes the session and emits
//!    `session-cleaned`

mod backend;
mod chromium;
mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub use backend::{BrowserBackend, BrowserDriver, LaunchedBrowser, PageDriver, ResolvedOptions};
pub use chromium::ChromiumBackend;
use dashctl_protocol::{
	ElementInfo, LifecycleEvent, RelayMessage, SessionOptions, SessionStatus, SessionSummary, Timestamp, WaitUntil,
	now_ms,
};
use dashctl_runtime::PageEvent;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
pub use state::{IllegalTransition, SessionState};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::handlers::{HandlerMap, Subscription};

/// Upper bound on closing a page or browser during cleanup.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
	Lifecycle(LifecycleEvent),
	Page(PageEvent),
}

/// Event published by the [`SessionManager`], keyed by session id.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
	pub session_id: String,
	pub kind: SessionEventKind,
}

impl SessionEvent {
	/// Wire form pushed to stream subscribers.
	pub fn to_relay_message(&self) -> RelayMessage {
		match &self.kind {
			SessionEventKind::Lifecycle(event) => RelayMessage::SessionEvent {
				event: *event,
				timestamp: now_ms(),
			},
			SessionEventKind::Page(PageEvent::Console { level, text, timestamp }) => RelayMessage::Console {
				level: level.clone(),
				text: text.clone(),
				timestamp: *timestamp,
			},
			SessionEventKind::Page(PageEvent::Error {
				message,
				stack,
				timestamp,
			}) => RelayMessage::Error {
				message: message.clone(),
				stack: stack.clone(),
				timestamp: *timestamp,
			},
			SessionEventKind::Page(PageEvent::Network {
				method,
				url,
				status,
				timestamp,
			}) => RelayMessage::Network {
				method: method.clone(),
				url: url.clone(),
				status: *status,
				timestamp: *timestamp,
			},
			SessionEventKind::Page(PageEvent::Navigation { url, timestamp }) => RelayMessage::Navigation {
				url: url.clone(),
				timestamp: *timestamp,
			},
		}
	}
}

struct Session {
	id: String,
	created_at: Timestamp,
	/// Monotonic, drives idle eviction.
	last_activity: Mutex<Instant>,
	/// Wall clock, reported only.
	last_activity_ms: AtomicU64,
	options: ResolvedOptions,
	state: Mutex<SessionState>,
	page: Arc<dyn PageDriver>,
	browser: tokio::sync::Mutex<Option<Box<dyn BrowserDriver>>>,
	event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
	fn touch(&self) {
		*self.last_activity.lock() = Instant::now();
		self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
	}

	fn idle_for(&self) -> Duration {
		self.last_activity.lock().elapsed()
	}

	fn summary(&self) -> SessionSummary {
		let now = now_ms();
		let crashed = self.state.lock().is_crashed();
		SessionSummary {
			session_id: self.id.clone(),
			created_at: self.created_at,
			last_activity: self.last_activity_ms.load(Ordering::Relaxed),
			uptime: now.saturating_sub(self.created_at),
			crashed,
			page_url: (!crashed).then(|| self.page.url()),
		}
	}

	fn status(&self) -> SessionStatus {
		let summary = self.summary();
		SessionStatus {
			session_id: summary.session_id,
			active: self.state.lock().is_active(),
			page_url: summary.page_url,
			created_at: summary.created_at,
			last_activity: summary.last_activity,
			uptime: summary.uptime,
		}
	}
}

#[derive(Default)]
struct Registry {
	sessions: HashMap<String, Arc<Session>>,
	/// Slots held by launches still in flight.
	reserved: usize,
}

struct ManagerInner {
	config: SessionConfig,
	backend: Arc<dyn BrowserBackend>,
	registry: Mutex<Registry>,
	handlers: HandlerMap<SessionEvent>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Pool capacity held for a session that has not launched yet.
///
/// Obtained from [`SessionManager::reserve`]. Dropping it without calling
/// [`launch`](Self::launch) gives the slot back.
pub struct SessionSlot {
	inner: Arc<ManagerInner>,
}

impl Drop for SessionSlot {
	fn drop(&mut self) {
		let mut registry = self.inner.registry.lock();
		registry.reserved = registry.reserved.saturating_sub(1);
	}
}

impl SessionSlot {
	/// Launches a browser into this slot and registers the session.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] for an empty viewport,
	/// [`Error::LaunchFailed`] when the browser cannot be started. The slot is
	/// released either way.
	pub async fn launch(self, options: SessionOptions) -> Result<String> {
		let inner = Arc::clone(&self.inner);
		let resolved = inner.resolve(&options)?;
		let launched = inner.backend.launch(&resolved).await?;
		let session_id = generate_session_id();
		let now = now_ms();
		let session = Arc::new(Session {
			id: session_id.clone(),
			created_at: now,
			last_activity: Mutex::new(Instant::now()),
			last_activity_ms: AtomicU64::new(now),
			options: resolved,
			state: Mutex::new(SessionState::Active),
			page: launched.page,
			browser: tokio::sync::Mutex::new(Some(launched.browser)),
			event_pump: Mutex::new(None),
		});

		inner
			.registry
			.lock()
			.sessions
			.insert(session_id.clone(), Arc::clone(&session));
		drop(self);

		let pump = tokio::spawn(pump_page_events(
			Arc::downgrade(&inner),
			session_id.clone(),
			launched.events,
		));
		*session.event_pump.lock() = Some(pump);
		tokio::spawn(watch_for_crash(
			Arc::downgrade(&inner),
			session_id.clone(),
			launched.disconnected,
		));

		info!(
			target = "dashctl.session",
			session_id = %session_id,
			headless = session.options.headless,
			width = session.options.width,
			height = session.options.height,
			slow_mo = session.options.slow_mo,
			"session created"
		);
		inner.emit(&session_id, SessionEventKind::Lifecycle(LifecycleEvent::SessionCreated));
		Ok(session_id)
	}
}

/// Removes a session and announces it, even if cleanup is cancelled midway.
struct Removal<'a> {
	inner: &'a ManagerInner,
	session: &'a Session,
}

impl Drop for Removal<'_> {
	fn drop(&mut self) {
		let _ = self.session.state.lock().finish();
		let removed = self.inner.registry.lock().sessions.remove(&self.session.id).is_some();
		if removed {
			info!(target = "dashctl.session", session_id = %self.session.id, "session cleaned up");
			self.inner
				.emit(&self.session.id, SessionEventKind::Lifecycle(LifecycleEvent::SessionCleaned));
		}
	}
}

impl ManagerInner {
	fn emit(&self, session_id: &str, kind: SessionEventKind) {
		self.handlers.publish(&SessionEvent {
			session_id: session_id.to_string(),
			kind,
		});
	}

	fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
		self.registry.lock().sessions.get(session_id).cloned()
	}

	fn resolve(&self, options: &SessionOptions) -> Result<ResolvedOptions> {
		let width = options.width.unwrap_or(self.config.default_width);
		let height = options.height.unwrap_or(self.config.default_height);
		if width == 0 || height == 0 {
			return Err(Error::InvalidArgument(format!("viewport {width}x{height} is empty")));
		}
		Ok(ResolvedOptions {
			headless: self.config.headless_override.or(options.headless).unwrap_or(true),
			width,
			height,
			slow_mo: options.slow_mo.unwrap_or(self.config.default_slow_mo),
			executable: self.config.browser_executable.clone(),
		})
	}

	async fn cleanup(&self, session_id: &str) -> bool {
		let Some(session) = self.lookup(session_id) else {
			return false;
		};
		if let Err(err) = session.state.lock().begin_cleanup() {
			debug!(target = "dashctl.session", session_id, %err, "cleanup already in progress");
			return false;
		}
		let _removal = Removal {
			inner: self,
			session: &session,
		};

		if let Some(pump) = session.event_pump.lock().take() {
			pump.abort();
		}

		match tokio::time::timeout(CLOSE_TIMEOUT, session.page.close()).await {
			Ok(Ok(())) => {}
			Ok(Err(err)) => warn!(target = "dashctl.session", session_id, error = %err, "failed to close page"),
			Err(_) => warn!(target = "dashctl.session", session_id, "timed out closing page"),
		}

		let browser = session.browser.lock().await.take();
		if let Some(browser) = browser {
			match tokio::time::timeout(CLOSE_TIMEOUT, browser.close()).await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => warn!(target = "dashctl.session", session_id, error = %err, "failed to close browser"),
				Err(_) => warn!(target = "dashctl.session", session_id, "timed out closing browser"),
			}
		}
		true
	}

	fn idle_candidates(&self) -> Vec<String> {
		let idle_timeout = self.config.idle_timeout;
		self.registry
			.lock()
			.sessions
			.values()
			.filter(|s| s.idle_for() > idle_timeout)
			.map(|s| s.id.clone())
			.collect()
	}
}

/// Owner of every browser session.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct SessionManager {
	inner: Arc<ManagerInner>,
}

impl SessionManager {
	/// Creates a manager and starts its idle sweeper.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(config: SessionConfig, backend: Arc<dyn BrowserBackend>) -> Self {
		let manager = Self {
			inner: Arc::new(ManagerInner {
				config,
				backend,
				registry: Mutex::new(Registry::default()),
				handlers: HandlerMap::new(),
				sweeper: Mutex::new(None),
			}),
		};
		manager.start_idle_sweeper();
		manager
	}

	/// Creates a manager that launches local Chromium.
	pub fn chromium(config: SessionConfig) -> Self {
		Self::new(config, Arc::new(ChromiumBackend::new()))
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Holds one unit of pool capacity without launching anything.
	///
	/// Lets callers fail fast on a full pool before doing other slow work.
	///
	/// # Errors
	///
	/// [`Error::CapacityExceeded`] when live sessions plus outstanding slots
	/// already reach the cap.
	pub fn reserve(&self) -> Result<SessionSlot> {
		let mut registry = self.inner.registry.lock();
		let max = self.inner.config.max_sessions;
		if registry.sessions.len() + registry.reserved >= max {
			warn!(target = "dashctl.session", max, "session capacity reached");
			return Err(Error::CapacityExceeded { max });
		}
		registry.reserved += 1;
		Ok(SessionSlot {
			inner: Arc::clone(&self.inner),
		})
	}

	/// Launches a browser and registers a new session.
	///
	/// # Errors
	///
	/// [`Error::CapacityExceeded`] when the pool is full (nothing is launched),
	/// [`Error::LaunchFailed`] when the browser cannot be started.
	pub async fn create_session(&self, options: SessionOptions) -> Result<String> {
		self.inner.resolve(&options)?;
		self.reserve()?.launch(options).await
	}

	/// Returns a handle to a live session and marks it active.
	///
	/// # Errors
	///
	/// [`Error::SessionNotFound`] for unknown or departing sessions,
	/// [`Error::SessionCrashed`] once the browser has disconnected.
	pub fn get_session(&self, session_id: &str) -> Result<SessionHandle> {
		let session = self
			.inner
			.lookup(session_id)
			.ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
		match *session.state.lock() {
			SessionState::Active => {}
			SessionState::Crashed => return Err(Error::SessionCrashed(session_id.to_string())),
			SessionState::CleaningUp | SessionState::Gone => {
				return Err(Error::SessionNotFound(session_id.to_string()));
			}
		}
		session.touch();
		Ok(SessionHandle { session })
	}

	/// Status of a registered session, crashed ones included.
	///
	/// Unlike [`get_session`](Self::get_session) this does not count as activity.
	pub fn session_status(&self, session_id: &str) -> Result<SessionStatus> {
		self.inner
			.lookup(session_id)
			.map(|session| session.status())
			.ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
	}

	pub fn has_session(&self, session_id: &str) -> bool {
		self.inner.registry.lock().sessions.contains_key(session_id)
	}

	/// Summaries of every registered session, oldest first.
	pub fn get_all_sessions(&self) -> Vec<SessionSummary> {
		let sessions: Vec<Arc<Session>> = self.inner.registry.lock().sessions.values().cloned().collect();
		let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
		summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.session_id.cmp(&b.session_id)));
		summaries
	}

	pub fn session_count(&self) -> usize {
		self.inner.registry.lock().sessions.len()
	}

	/// Closes the page and browser and removes the session.
	///
	/// Returns false if the session is unknown or already being cleaned up.
	/// Close failures are logged and never prevent removal.
	pub async fn cleanup(&self, session_id: &str) -> bool {
		self.inner.cleanup(session_id).await
	}

	/// Cleans every session concurrently and returns how many were removed.
	pub async fn cleanup_all(&self) -> usize {
		let ids: Vec<String> = self.inner.registry.lock().sessions.keys().cloned().collect();
		if ids.is_empty() {
			return 0;
		}
		info!(target = "dashctl.session", count = ids.len(), "cleaning up all sessions");
		let results = join_all(ids.iter().map(|id| self.inner.cleanup(id))).await;
		results.into_iter().filter(|cleaned| *cleaned).count()
	}

	/// Stops the idle sweeper and cleans every session.
	pub async fn shutdown(&self) {
		if let Some(sweeper) = self.inner.sweeper.lock().take() {
			sweeper.abort();
		}
		self.cleanup_all().await;
	}

	/// Cleans every session idle longer than the configured timeout.
	///
	/// Candidates are collected before any cleanup runs.
	pub async fn sweep_idle(&self) -> usize {
		let candidates = self.inner.idle_candidates();
		let mut evicted = 0;
		for session_id in candidates {
			info!(target = "dashctl.session", session_id = %session_id, "evicting idle session");
			if self.inner.cleanup(&session_id).await {
				evicted += 1;
			}
		}
		evicted
	}

	/// Registers a listener for every session event.
	pub fn subscribe<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		self.inner.handlers.subscribe(handler)
	}

	fn start_idle_sweeper(&self) {
		let weak = Arc::downgrade(&self.inner);
		let period = self.inner.config.sweep_interval;
		let handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			interval.tick().await;
			loop {
				interval.tick().await;
				let Some(inner) = weak.upgrade() else { break };
				let manager = SessionManager { inner };
				let evicted = manager.sweep_idle().await;
				if evicted > 0 {
					debug!(target = "dashctl.session", evicted, "idle sweep finished");
				}
			}
		});
		*self.inner.sweeper.lock() = Some(handle);
	}

	/// Moves a session's reported last activity into the past, as a wall
	/// clock jump would. Idle eviction is unaffected.
	#[cfg(test)]
	fn backdate_reported_activity(&self, session_id: &str, by: Duration) {
		if let Some(session) = self.inner.lookup(session_id) {
			let ms = session.last_activity_ms.load(Ordering::Relaxed);
			session
				.last_activity_ms
				.store(ms.saturating_sub(by.as_millis() as u64), Ordering::Relaxed);
		}
	}
}

/// Access to one live session's page.
///
/// Every operation refuses to run once the session has crashed and is
/// preceded by the session's slow-motion delay.
#[derive(Clone)]
pub struct SessionHandle {
	session: Arc<Session>,
}

impl SessionHandle {
	pub fn id(&self) -> &str {
		&self.session.id
	}

	pub fn options(&self) -> &ResolvedOptions {
		&self.session.options
	}

	pub fn page_url(&self) -> String {
		self.session.page.url()
	}

	pub fn status(&self) -> SessionStatus {
		self.session.status()
	}

	async fn prepare(&self) -> Result<&dyn PageDriver> {
		if !self.session.state.lock().is_active() {
			return Err(Error::SessionCrashed(self.session.id.clone()));
		}
		if self.session.options.slow_mo > 0 {
			tokio::time::sleep(Duration::from_millis(self.session.options.slow_mo)).await;
		}
		self.session.touch();
		Ok(self.session.page.as_ref())
	}

	pub async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<String> {
		let page = self.prepare().await?;
		page.goto(url, wait_until, timeout).await?;
		Ok(page.url())
	}

	pub async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> Result<String> {
		let page = self.prepare().await?;
		page.reload(wait_until, timeout).await?;
		Ok(page.url())
	}

	pub async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
		Ok(self.prepare().await?.click(selector, timeout).await?)
	}

	pub async fn type_text(&self, selector: &str, text: &str, clear: bool, timeout: Duration) -> Result<()> {
		Ok(self.prepare().await?.type_text(selector, text, clear, timeout).await?)
	}

	pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
		Ok(self.prepare().await?.wait_for_selector(selector, timeout).await?)
	}

	/// Sleeps for `duration` after the slow-motion delay.
	pub async fn wait_for_timeout(&self, duration: Duration) -> Result<()> {
		self.prepare().await?;
		tokio::time::sleep(duration).await;
		Ok(())
	}

	pub async fn evaluate(&self, script: &str) -> Result<Value> {
		Ok(self.prepare().await?.evaluate(script).await?)
	}

	pub async fn query(&self, selector: &str) -> Result<Vec<ElementInfo>> {
		Ok(self.prepare().await?.query(selector).await?)
	}

	pub async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
		Ok(self.prepare().await?.screenshot(full_page).await?)
	}
}

/// Time-ordered id: creation millis plus a random suffix.
fn generate_session_id() -> String {
	let suffix = Uuid::new_v4().simple().to_string();
	format!("{}-{}", now_ms(), &suffix[..8])
}

async fn pump_page_events(
	manager: Weak<ManagerInner>,
	session_id: String,
	mut events: mpsc::UnboundedReceiver<PageEvent>,
) {
	while let Some(event) = events.recv().await {
		let Some(inner) = manager.upgrade() else { break };
		inner.emit(&session_id, SessionEventKind::Page(event));
	}
}

async fn watch_for_crash(manager: Weak<ManagerInner>, session_id: String, disconnected: oneshot::Receiver<()>) {
	if disconnected.await.is_err() {
		return;
	}
	let grace = {
		let Some(inner) = manager.upgrade() else { return };
		let Some(session) = inner.lookup(&session_id) else { return };
		// Disconnects caused by cleanup are expected.
		if session.state.lock().crash().is_err() {
			return;
		}
		warn!(target = "dashctl.session", session_id = %session_id, "browser disconnected; session crashed");
		inner.emit(&session_id, SessionEventKind::Lifecycle(LifecycleEvent::SessionCrashed));
		inner.config.crash_grace
	};

	tokio::time::sleep(grace).await;
	if let Some(inner) = manager.upgrade() {
		inner.cleanup(&session_id).await;
	}
}
