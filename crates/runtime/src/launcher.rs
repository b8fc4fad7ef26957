//! Chromium discovery and launch arguments.
//!
//! The executable is located in the following order:
//! 1. An explicit path passed in [`LaunchOptions::executable`]
//! 2. `DASHCTL_BROWSER` environment variable
//! 3. `CHROME_PATH` environment variable
//! 4. A `PATH` search over common Chromium/Chrome binary names
//! 5. Well-known install locations

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::error::{Error, Result};

/// Binary names searched on `PATH`.
const PATH_CANDIDATES: &[&str] = &[
	"chromium",
	"chromium-browser",
	"google-chrome",
	"google-chrome-stable",
	"chrome",
];

#[cfg(target_os = "macos")]
const COMMON_LOCATIONS: &[&str] = &[
	"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
	"/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(windows)]
const COMMON_LOCATIONS: &[&str] = &[
	"C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
	"C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
];

#[cfg(not(any(target_os = "macos", windows)))]
const COMMON_LOCATIONS: &[&str] = &["/usr/bin/chromium", "/snap/bin/chromium", "/opt/google/chrome/chrome"];

/// Prefix Chromium prints on stderr once the DevTools endpoint is up.
const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// Options for launching one browser process.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
	pub executable: Option<PathBuf>,
	pub headless: bool,
	pub width: u32,
	pub height: u32,
	/// Extra command-line switches appended after the defaults.
	pub extra_args: Vec<String>,
	/// How long to wait for the DevTools endpoint.
	pub startup_timeout: Duration,
}

impl Default for LaunchOptions {
	fn default() -> Self {
		Self {
			executable: None,
			headless: true,
			width: 1280,
			height: 720,
			extra_args: Vec::new(),
			startup_timeout: Duration::from_secs(30),
		}
	}
}

/// Locates the browser executable.
///
/// # Errors
///
/// Returns [`Error::BrowserNotFound`] if no candidate exists.
pub fn find_browser_executable(explicit: Option<&Path>) -> Result<PathBuf> {
	if let Some(path) = explicit {
		return existing(path.to_path_buf()).ok_or(Error::BrowserNotFound);
	}

	for var in ["DASHCTL_BROWSER", "CHROME_PATH"] {
		if let Ok(value) = std::env::var(var) {
			if let Some(path) = existing(PathBuf::from(&value)).or_else(|| which::which(&value).ok()) {
				debug!(target = "dashctl.cdp", source = var, path = %path.display(), "browser executable");
				return Ok(path);
			}
		}
	}

	for name in PATH_CANDIDATES {
		if let Ok(path) = which::which(name) {
			debug!(target = "dashctl.cdp", source = "PATH", path = %path.display(), "browser executable");
			return Ok(path);
		}
	}

	COMMON_LOCATIONS
		.iter()
		.find_map(|location| existing(PathBuf::from(location)))
		.ok_or(Error::BrowserNotFound)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
	path.is_file().then_some(path)
}

/// Builds the Chromium command line for `options`.
pub fn browser_args(options: &LaunchOptions, user_data_dir: &Path) -> Vec<String> {
	let mut args = vec![
		"--remote-debugging-port=0".to_string(),
		format!("--user-data-dir={}", user_data_dir.display()),
		format!("--window-size={},{}", options.width, options.height),
		"--no-first-run".to_string(),
		"--no-default-browser-check".to_string(),
		"--disable-background-networking".to_string(),
		"--disable-sync".to_string(),
		"--disable-dev-shm-usage".to_string(),
	];
	if options.headless {
		args.push("--headless=new".to_string());
		args.push("--hide-scrollbars".to_string());
		args.push("--mute-audio".to_string());
	}
	args.extend(options.extra_args.iter().cloned());
	args.push("about:blank".to_string());
	args
}

/// Extracts the WebSocket URL from a Chromium stderr line.
pub fn parse_devtools_line(line: &str) -> Option<&str> {
	let rest = line.trim().strip_prefix(DEVTOOLS_PREFIX)?;
	rest.starts_with("ws://").then_some(rest)
}

/// Reads stderr until the DevTools endpoint appears.
///
/// Returns the endpoint and the reader so the caller can keep draining it.
/// Lines seen before the endpoint are included in the error on failure.
pub async fn read_devtools_endpoint<R>(stderr: R, timeout: Duration) -> Result<(String, BufReader<R>)>
where
	R: AsyncRead + Unpin,
{
	let mut reader = BufReader::new(stderr);
	let mut seen = Vec::new();

	let scan = async {
		let mut line = String::new();
		loop {
			line.clear();
			let read = reader.read_line(&mut line).await?;
			if read == 0 {
				return Err(Error::LaunchFailed(format!(
					"browser exited before exposing DevTools: {}",
					seen.join(" | ")
				)));
			}
			if let Some(url) = parse_devtools_line(&line) {
				return Ok::<_, Error>(url.to_string());
			}
			if seen.len() < 20 {
				seen.push(line.trim().to_string());
			}
		}
	};

	let url = tokio::time::timeout(timeout, scan)
		.await
		.map_err(|_| Error::LaunchFailed(format!("no DevTools endpoint after {}ms", timeout.as_millis())))??;
	Ok((url, reader))
}
