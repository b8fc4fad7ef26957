//! Build readiness reported by an external watcher.

use std::time::Duration;

use dashctl_protocol::{BuildPhase, ReadyStatus, now_ms};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Shared readiness flag. Starts ready; clones observe the same state.
#[derive(Clone)]
pub struct ReadyState {
	tx: watch::Sender<ReadyStatus>,
}

impl Default for ReadyState {
	fn default() -> Self {
		Self::new()
	}
}

impl ReadyState {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(ReadyStatus {
			ready: true,
			state: BuildPhase::Ready,
			error: None,
			updated_at: now_ms(),
		});
		Self { tx }
	}

	/// Records a new build phase; `error` is kept only for failures.
	pub fn set(&self, state: BuildPhase, error: Option<String>) {
		self.tx.send_replace(ReadyStatus {
			ready: state == BuildPhase::Ready,
			state,
			error: error.filter(|_| state == BuildPhase::Failed),
			updated_at: now_ms(),
		});
	}

	pub fn status(&self) -> ReadyStatus {
		self.tx.borrow().clone()
	}

	/// Waits until the state is ready.
	///
	/// # Errors
	///
	/// [`Error::Timeout`] if the build is not ready within `timeout`.
	pub async fn wait_ready(&self, timeout: Duration) -> Result<ReadyStatus> {
		let mut rx = self.tx.subscribe();
		let wait = async {
			match rx.wait_for(|status| status.ready).await {
				Ok(status) => status.clone(),
				// The sender lives in `self`, so the channel cannot close here.
				Err(_) => self.status(),
			}
		};
		tokio::time::timeout(timeout, wait).await.map_err(|_| Error::Timeout {
			ms: timeout.as_millis() as u64,
			condition: "build to become ready".to_string(),
		})
	}
}
