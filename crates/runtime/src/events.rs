//! Page telemetry derived from DevTools events.

use std::collections::HashMap;

use dashctl_protocol::{Timestamp, now_ms};
use serde_json::Value;

/// Side-channel observation of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
	/// A `console.*` call.
	Console {
		level: String,
		text: String,
		timestamp: Timestamp,
	},
	/// An uncaught exception.
	Error {
		message: String,
		stack: Option<String>,
		timestamp: Timestamp,
	},
	/// A request that received a response.
	Network {
		method: String,
		url: String,
		status: u16,
		timestamp: Timestamp,
	},
	/// A top-frame navigation.
	Navigation { url: String, timestamp: Timestamp },
}

/// Upper bound on in-flight request methods remembered per page.
const MAX_TRACKED_REQUESTS: usize = 2048;

/// Translates raw DevTools events into [`PageEvent`]s.
///
/// Holds the request-id → method map needed to label responses, since
/// `Network.responseReceived` does not carry the request method.
#[derive(Debug, Default)]
pub struct NetworkTracker {
	methods: HashMap<String, String>,
}

impl NetworkTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the page event for `method`, if it maps to one.
	pub fn translate(&mut self, method: &str, params: &Value) -> Option<PageEvent> {
		match method {
			"Runtime.consoleAPICalled" => Some(console_event(params)),
			"Runtime.exceptionThrown" => Some(exception_event(params)),
			"Network.requestWillBeSent" => {
				let id = params.get("requestId")?.as_str()?;
				let req_method = params.pointer("/request/method")?.as_str()?;
				if self.methods.len() >= MAX_TRACKED_REQUESTS {
					self.methods.clear();
				}
				self.methods.insert(id.to_string(), req_method.to_string());
				None
			}
			"Network.responseReceived" => {
				let id = params.get("requestId").and_then(Value::as_str).unwrap_or_default();
				let response = params.get("response")?;
				let url = response.get("url")?.as_str()?.to_string();
				let status = response.get("status").and_then(Value::as_f64).unwrap_or(0.0) as u16;
				let method = self.methods.remove(id).unwrap_or_else(|| "GET".to_string());
				Some(PageEvent::Network {
					method,
					url,
					status,
					timestamp: now_ms(),
				})
			}
			"Network.loadingFailed" => {
				if let Some(id) = params.get("requestId").and_then(Value::as_str) {
					self.methods.remove(id);
				}
				None
			}
			"Page.frameNavigated" => {
				let frame = params.get("frame")?;
				if frame.get("parentId").is_some() {
					return None;
				}
				let url = frame.get("url")?.as_str()?.to_string();
				Some(PageEvent::Navigation {
					url,
					timestamp: now_ms(),
				})
			}
			_ => None,
		}
	}

	pub fn tracked_requests(&self) -> usize {
		self.methods.len()
	}
}

fn console_event(params: &Value) -> PageEvent {
	let level = match params.get("type").and_then(Value::as_str).unwrap_or("log") {
		"warning" => "warn",
		other => other,
	}
	.to_string();
	let text = params
		.get("args")
		.and_then(Value::as_array)
		.map(|args| args.iter().map(describe_remote_object).collect::<Vec<_>>().join(" "))
		.unwrap_or_default();
	PageEvent::Console {
		level,
		text,
		timestamp: now_ms(),
	}
}

fn exception_event(params: &Value) -> PageEvent {
	let details = params.get("exceptionDetails").cloned().unwrap_or(Value::Null);
	let description = details
		.pointer("/exception/description")
		.and_then(Value::as_str)
		.map(str::to_owned);
	let message = description
		.as_deref()
		.and_then(|d| d.lines().next())
		.or_else(|| details.get("text").and_then(Value::as_str))
		.unwrap_or("Uncaught exception")
		.to_string();
	let stack = format_stack(&details).or_else(|| description.filter(|d| d.contains('\n')));
	PageEvent::Error {
		message,
		stack,
		timestamp: now_ms(),
	}
}

fn format_stack(details: &Value) -> Option<String> {
	let frames = details.pointer("/stackTrace/callFrames")?.as_array()?;
	if frames.is_empty() {
		return None;
	}
	let lines: Vec<String> = frames
		.iter()
		.map(|frame| {
			let name = frame.get("functionName").and_then(Value::as_str).filter(|n| !n.is_empty());
			let url = frame.get("url").and_then(Value::as_str).unwrap_or("<anonymous>");
			// DevTools positions are zero-based.
			let line = frame.get("lineNumber").and_then(Value::as_u64).unwrap_or(0) + 1;
			let column = frame.get("columnNumber").and_then(Value::as_u64).unwrap_or(0) + 1;
			match name {
				Some(name) => format!("    at {name} ({url}:{line}:{column})"),
				None => format!("    at {url}:{line}:{column}"),
			}
		})
		.collect();
	Some(lines.join("\n"))
}

/// Renders a DevTools `RemoteObject` the way the console would print it.
fn describe_remote_object(arg: &Value) -> String {
	if let Some(value) = arg.get("value") {
		return match value {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};
	}
	if let Some(s) = arg.get("unserializableValue").and_then(Value::as_str) {
		return s.to_string();
	}
	if let Some(s) = arg.get("description").and_then(Value::as_str) {
		return s.to_string();
	}
	arg.get("type").and_then(Value::as_str).unwrap_or("undefined").to_string()
}
