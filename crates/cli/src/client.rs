//! HTTP client for a running control server.

use anyhow::{Context, Result, bail};
use dashctl_protocol::{ErrorBody, OperationResult, ServersStatus, SessionList};
use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

pub struct ControlClient {
	http: reqwest::Client,
	base: Url,
}

impl ControlClient {
	pub fn new(base: Url) -> Self {
		Self {
			http: reqwest::Client::new(),
			base,
		}
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		self.base
			.join(path)
			.with_context(|| format!("Invalid endpoint {path} for {}", self.base))
	}

	pub async fn sessions(&self) -> Result<SessionList> {
		let resp = self.http.get(self.endpoint("sessions")?).send().await;
		decode(resp, "sessions").await
	}

	pub async fn servers(&self) -> Result<ServersStatus> {
		let resp = self.http.get(self.endpoint("servers/status")?).send().await;
		decode(resp, "servers/status").await
	}

	pub async fn cleanup(&self) -> Result<OperationResult> {
		let resp = self.http.post(self.endpoint("cleanup")?).send().await;
		decode(resp, "cleanup").await
	}

	pub async fn stop_servers(&self) -> Result<OperationResult> {
		let resp = self.http.post(self.endpoint("servers/stop")?).send().await;
		decode(resp, "servers/stop").await
	}
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Result<Response>, what: &str) -> Result<T> {
	let resp = resp.with_context(|| format!("Request to /{what} failed; is `dashctl serve` running?"))?;
	let status = resp.status();
	if !status.is_success() {
		let body = resp.text().await.unwrap_or_default();
		match serde_json::from_str::<ErrorBody>(&body) {
			Ok(err) => bail!("/{what} returned {status}: {} ({})", err.error, err.code),
			Err(_) => bail!("/{what} returned {status}: {body}"),
		}
	}
	resp.json::<T>()
		.await
		.with_context(|| format!("Invalid response from /{what}"))
}
