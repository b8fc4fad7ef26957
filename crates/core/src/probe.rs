//! Liveness probes for ports and HTTP health endpoints.
//!
//! Probes never fail on individual connection errors; only the overall
//! deadline produces an error.

use std::future::Future;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default TCP connect timeout for [`is_port_open`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a single health request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Returns true if a TCP connection to `host:port` succeeds within one second.
pub async fn is_port_open(port: u16, host: &str) -> bool {
	is_port_open_with_timeout(port, host, DEFAULT_CONNECT_TIMEOUT).await
}

pub async fn is_port_open_with_timeout(port: u16, host: &str, timeout: Duration) -> bool {
	matches!(
		tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
		Ok(Ok(_))
	)
}

/// Asks the OS for a free loopback port.
pub async fn available_port() -> Result<u16> {
	let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
	Ok(listener.local_addr()?.port())
}

/// Runs `check` every `interval` until it returns true or `timeout` elapses.
///
/// Returns the elapsed time either way: `Ok` on success, `Err` on timeout.
pub async fn poll_until<F, Fut>(
	timeout: Duration,
	interval: Duration,
	mut check: F,
) -> std::result::Result<Duration, Duration>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	let start = Instant::now();
	let deadline = start + timeout;
	loop {
		let now = Instant::now();
		if now >= deadline {
			return Err(start.elapsed());
		}
		if tokio::time::timeout(deadline - now, check()).await.unwrap_or(false) {
			return Ok(start.elapsed());
		}
		let now = Instant::now();
		if now >= deadline {
			return Err(start.elapsed());
		}
		tokio::time::sleep(interval.min(deadline - now)).await;
	}
}

/// Polls `url` with GET until it answers 2xx or 404.
///
/// A 404 counts as alive: the server is up even if the health route is not
/// mounted where expected.
///
/// # Errors
///
/// [`Error::HealthCheckTimeout`] carrying the timeout and the elapsed wait.
pub async fn poll_health_url(url: &str, timeout: Duration, interval: Duration) -> Result<()> {
	let client = reqwest::Client::builder()
		.timeout(REQUEST_TIMEOUT.min(timeout.max(Duration::from_millis(100))))
		.build()
		.map_err(|e| Error::InvalidArgument(format!("cannot build HTTP client: {e}")))?;

	let mut attempts = 0u32;
	let outcome = poll_until(timeout, interval, || {
		attempts += 1;
		let request = client.get(url).send();
		async move {
			match request.await {
				Ok(response) => {
					let status = response.status();
					trace!(target = "dashctl.servers", url, %status, "health probe");
					status.is_success() || status == reqwest::StatusCode::NOT_FOUND
				}
				Err(err) => {
					trace!(target = "dashctl.servers", url, error = %err, "health probe failed");
					false
				}
			}
		}
	})
	.await;

	match outcome {
		Ok(elapsed) => {
			debug!(
				target = "dashctl.servers",
				url,
				attempts,
				elapsed_ms = elapsed.as_millis() as u64,
				"health check passed"
			);
			Ok(())
		}
		Err(elapsed) => Err(Error::HealthCheckTimeout {
			url: url.to_string(),
			timeout_ms: timeout.as_millis() as u64,
			elapsed_ms: elapsed.as_millis() as u64,
		}),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};

	use axum::Router;
	use axum::extract::State;
	use axum::http::StatusCode;
	use axum::routing::get;

	use super::*;

	async fn serve(app: Router) -> u16 {
		let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		port
	}

	#[tokio::test]
	async fn open_and_closed_ports() {
		let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		assert!(is_port_open(port, "127.0.0.1").await);

		drop(listener);
		let free = available_port().await.unwrap();
		assert!(!is_port_open_with_timeout(free, "127.0.0.1", Duration::from_millis(200)).await);
	}

	#[tokio::test]
	async fn health_succeeds_once_endpoint_turns_healthy() {
		let hits = Arc::new(AtomicU32::new(0));
		let app = Router::new()
			.route(
				"/parse/health",
				get(|State(hits): State<Arc<AtomicU32>>| async move {
					if hits.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
						StatusCode::OK
					} else {
						StatusCode::SERVICE_UNAVAILABLE
					}
				}),
			)
			.with_state(Arc::clone(&hits));
		let port = serve(app).await;

		poll_health_url(
			&format!("http://127.0.0.1:{port}/parse/health"),
			Duration::from_secs(5),
			Duration::from_millis(20),
		)
		.await
		.unwrap();
		assert_eq!(hits.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn not_found_counts_as_alive() {
		let port = serve(Router::new()).await;
		poll_health_url(
			&format!("http://127.0.0.1:{port}/health"),
			Duration::from_secs(2),
			Duration::from_millis(20),
		)
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn unreachable_endpoint_times_out_with_timeout_in_message() {
		let port = available_port().await.unwrap();
		let err = poll_health_url(
			&format!("http://127.0.0.1:{port}/health"),
			Duration::from_millis(300),
			Duration::from_millis(50),
		)
		.await
		.unwrap_err();
		assert!(err.is_timeout());
		assert!(err.to_string().contains("300ms"), "{err}");
	}

	#[tokio::test(start_paused = true)]
	async fn poll_until_reports_elapsed_on_timeout() {
		let mut calls = 0;
		let result = poll_until(Duration::from_secs(2), Duration::from_millis(500), || {
			calls += 1;
			async { false }
		})
		.await;
		let elapsed = result.unwrap_err();
		assert!(elapsed >= Duration::from_secs(2));
		assert_eq!(calls, 4);
	}
}
