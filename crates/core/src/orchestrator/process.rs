//! Child process spawning with captured output and graceful termination.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lines of child output kept for diagnostics.
const OUTPUT_CAPACITY: usize = 200;

/// Bounded tail of a child's stdout and stderr.
#[derive(Clone)]
pub struct OutputLog {
	lines: Arc<Mutex<VecDeque<String>>>,
	/// Number of output streams still being drained.
	open_streams: Arc<watch::Sender<usize>>,
}

impl Default for OutputLog {
	fn default() -> Self {
		Self {
			lines: Arc::new(Mutex::new(VecDeque::new())),
			open_streams: Arc::new(watch::channel(0).0),
		}
	}
}

impl OutputLog {
	pub fn push(&self, line: String) {
		let mut lines = self.lines.lock();
		if lines.len() == OUTPUT_CAPACITY {
			lines.pop_front();
		}
		lines.push_back(line);
	}

	pub fn snapshot(&self) -> Vec<String> {
		self.lines.lock().iter().cloned().collect()
	}

	/// Waits up to `timeout` for every stream to reach EOF, then snapshots.
	pub async fn settle(&self, timeout: Duration) -> Vec<String> {
		let mut open = self.open_streams.subscribe();
		let _ = tokio::time::timeout(timeout, open.wait_for(|n| *n == 0)).await;
		self.snapshot()
	}
}

/// Spawns `program args...` with piped output drained into an [`OutputLog`].
pub fn spawn_captured(service: &'static str, program: &str, args: &[String]) -> Result<(Child, OutputLog)> {
	let mut command = Command::new(program);
	command
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);
	// Own process group so termination reaches wrappers' children too.
	#[cfg(unix)]
	command.process_group(0);
	let mut child = command.spawn().map_err(|e| Error::StartupFailed {
		service,
		source: Box::new(Error::Io(std::io::Error::new(
			e.kind(),
			format!("failed to spawn {program}: {e}"),
		))),
		output: Vec::new(),
	})?;

	let log = OutputLog::default();
	if let Some(stdout) = child.stdout.take() {
		log.open_streams.send_modify(|n| *n += 1);
		tokio::spawn(drain(service, "stdout", stdout, log.clone()));
	}
	if let Some(stderr) = child.stderr.take() {
		log.open_streams.send_modify(|n| *n += 1);
		tokio::spawn(drain(service, "stderr", stderr, log.clone()));
	}
	debug!(target = "dashctl.servers", service, program, pid = child.id(), "spawned");
	Ok((child, log))
}

async fn drain<R: AsyncRead + Unpin>(service: &'static str, stream: &'static str, reader: R, log: OutputLog) {
	let mut lines = BufReader::new(reader).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		debug!(target = "dashctl.servers", service, stream, "{line}");
		log.push(line);
	}
	log.open_streams.send_modify(|n| *n = n.saturating_sub(1));
}

/// Asks `child` to exit, killing it if it is still running after `grace`.
///
/// The kill timer only lives for the duration of the wait.
pub async fn terminate(service: &'static str, child: &mut Child, grace: Duration) -> Result<ExitStatus> {
	if let Some(status) = child.try_wait()? {
		return Ok(status);
	}

	signal_group(child, Signal::Term);
	match tokio::time::timeout(grace, child.wait()).await {
		Ok(status) => Ok(status?),
		Err(_) => {
			warn!(
				target = "dashctl.servers",
				service,
				grace_ms = grace.as_millis() as u64,
				"did not exit after SIGTERM; killing"
			);
			kill(child).await
		}
	}
}

/// Kills `child` and its process group immediately.
pub async fn kill(child: &mut Child) -> Result<ExitStatus> {
	signal_group(child, Signal::Kill);
	let _ = child.start_kill();
	Ok(child.wait().await?)
}

#[derive(Clone, Copy)]
enum Signal {
	Term,
	Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal) {
	let Some(pid) = child.id() else { return };
	let signal = match signal {
		Signal::Term => libc::SIGTERM,
		Signal::Kill => libc::SIGKILL,
	};
	// SAFETY: the child leads its own process group; kill(2) has no memory effects.
	unsafe {
		libc::kill(-(pid as libc::pid_t), signal);
	}
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
	let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;

	fn sh(script: &str) -> Vec<String> {
		vec!["-c".to_string(), script.to_string()]
	}

	#[tokio::test]
	async fn captures_output_lines() {
		let (mut child, log) = spawn_captured("test", "sh", &sh("echo hello; echo oops >&2")).unwrap();
		child.wait().await.unwrap();
		let lines = log.settle(Duration::from_secs(2)).await;
		assert!(lines.contains(&"hello".to_string()));
		assert!(lines.contains(&"oops".to_string()));
	}

	#[tokio::test]
	async fn missing_program_is_a_startup_failure() {
		let err = spawn_captured("backend", "dashctl-no-such-program", &[]).err().unwrap();
		assert!(matches!(err, Error::StartupFailed { service: "backend", .. }), "{err}");
		assert_eq!(err.code(), "startup_failed");
		assert!(err.to_string().contains("dashctl-no-such-program"), "{err}");
	}

	#[test]
	fn output_log_is_bounded() {
		let log = OutputLog::default();
		for i in 0..(OUTPUT_CAPACITY + 5) {
			log.push(i.to_string());
		}
		let lines = log.snapshot();
		assert_eq!(lines.len(), OUTPUT_CAPACITY);
		assert_eq!(lines[0], "5");
	}

	#[tokio::test]
	async fn terminate_stops_cooperative_child() {
		let (mut child, _log) = spawn_captured("test", "sleep", &["30".to_string()]).unwrap();
		let status = terminate("test", &mut child, Duration::from_secs(5)).await.unwrap();
		assert!(!status.success());
	}

	#[tokio::test]
	async fn terminate_kills_child_ignoring_sigterm() {
		let (mut child, _log) = spawn_captured("test", "sh", &sh("trap '' TERM; sleep 30")).unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;
		let start = std::time::Instant::now();
		terminate("test", &mut child, Duration::from_millis(200)).await.unwrap();
		assert!(start.elapsed() < Duration::from_secs(5));
	}
}
