use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use dashctl::testing::{FakeBackend, PNG_SIGNATURE};
use dashctl::{OrchestratorConfig, ServerOrchestrator, SessionConfig, SessionManager};
use dashctl_cli::api::{self, AppState};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app_with(config: SessionConfig) -> (Router, AppState, FakeBackend) {
	let backend = FakeBackend::new();
	let sessions = SessionManager::new(config, Arc::new(backend.clone()));
	let servers = ServerOrchestrator::new(OrchestratorConfig {
		backend_command: vec!["true".into()],
		..OrchestratorConfig::default()
	});
	let state = AppState::new(sessions, servers);
	(api::router(state.clone()), state, backend)
}

fn app() -> (Router, AppState, FakeBackend) {
	app_with(SessionConfig::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
	let (status, _, bytes) = send_raw(app, method, uri, body).await;
	let json = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};
	(status, json)
}

async fn send_raw(
	app: &Router,
	method: Method,
	uri: &str,
	body: Option<Value>,
) -> (StatusCode, Option<String>, Vec<u8>) {
	let mut req = Request::builder().method(method).uri(uri);
	let body = match body {
		Some(value) => {
			req = req.header(header::CONTENT_TYPE, "application/json");
			Body::from(value.to_string())
		}
		None => Body::empty(),
	};
	let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
	let status = resp.status();
	let content_type = resp
		.headers()
		.get(header::CONTENT_TYPE)
		.map(|v| v.to_str().unwrap().to_string());
	let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	(status, content_type, bytes.to_vec())
}

async fn start_session(app: &Router) -> String {
	let (status, body) = send(app, Method::POST, "/session/start", Some(json!({}))).await;
	assert_eq!(status, StatusCode::OK, "{body}");
	body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
	let (app, _, _) = app();
	let (status, body) = send(&app, Method::GET, "/health", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn start_with_empty_body_uses_defaults() {
	let (app, state, backend) = app();
	let (status, body) = send(&app, Method::POST, "/session/start", None).await;
	assert_eq!(status, StatusCode::OK, "{body}");
	let session_id = body["sessionId"].as_str().unwrap();
	assert!(state.sessions.has_session(session_id));
	assert!(body.get("dashboardUrl").is_none());
	assert!(backend.last_launch().unwrap().options().headless);
}

#[tokio::test]
async fn start_passes_session_options() {
	let (app, _, backend) = app();
	let (status, _) = send(
		&app,
		Method::POST,
		"/session/start",
		Some(json!({"width": 800, "height": 600, "slowMo": 0})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	let options = backend.last_launch().unwrap().options().clone();
	assert_eq!((options.width, options.height), (800, 600));
}

#[tokio::test]
async fn capacity_errors_are_structured() {
	let (app, _, _) = app_with(SessionConfig {
		max_sessions: 1,
		..SessionConfig::default()
	});
	start_session(&app).await;
	let (status, body) = send(&app, Method::POST, "/session/start", Some(json!({}))).await;
	assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
	assert_eq!(body["code"], "capacity_exceeded");
	assert_eq!(body["error"], "Maximum concurrent sessions (1) reached");

	let (_, list) = send(&app, Method::GET, "/sessions", None).await;
	assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn full_pool_refuses_before_starting_servers() {
	let (app, state, backend) = app_with(SessionConfig {
		max_sessions: 1,
		..SessionConfig::default()
	});
	start_session(&app).await;

	let (status, body) = tokio::time::timeout(
		Duration::from_secs(2),
		send(&app, Method::POST, "/session/start", Some(json!({"startServers": true}))),
	)
	.await
	.expect("capacity refusal should not wait on servers");
	assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
	assert_eq!(body["code"], "capacity_exceeded");
	assert!(!state.servers.get_status().backend.running);
	assert_eq!(state.servers.backend_phase(), dashctl::ProcessPhase::Stopped);
	assert_eq!(backend.launches().len(), 1);
}

#[tokio::test]
async fn list_and_status_describe_sessions() {
	let (app, _, _) = app();
	let id = start_session(&app).await;

	let (status, list) = send(&app, Method::GET, "/sessions", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(list["count"], 1);
	assert_eq!(list["sessions"][0]["sessionId"], id.as_str());
	assert_eq!(list["sessions"][0]["crashed"], false);
	assert!(list["sessions"][0]["uptime"].as_u64().is_some());

	let (status, body) = send(&app, Method::GET, &format!("/session/{id}/status"), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["active"], true);
	assert_eq!(body["pageUrl"], "about:blank");
}

#[tokio::test]
async fn delete_is_idempotent_over_http() {
	let (app, state, _) = app();
	let id = start_session(&app).await;

	let (status, body) = send(&app, Method::DELETE, &format!("/session/{id}"), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({"success": true, "sessionId": id}));
	assert!(!state.sessions.has_session(&id));

	let (status, body) = send(&app, Method::DELETE, &format!("/session/{id}"), None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["code"], "session_not_found");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
	let (app, _, _) = app();
	for (method, uri, body) in [
		(Method::GET, "/session/nope/status", None),
		(Method::POST, "/session/nope/navigate", Some(json!({"url": "http://x/"}))),
		(Method::GET, "/session/nope/screenshot", None),
	] {
		let (status, body) = send(&app, method, uri, body).await;
		assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
		assert_eq!(body["code"], "session_not_found");
	}
}

#[tokio::test]
async fn page_operations_reach_the_page() {
	let (app, _, backend) = app();
	let id = start_session(&app).await;
	let page = backend.last_launch().unwrap();

	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/navigate"),
		Some(json!({"url": "http://localhost:4040/apps"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({"success": true, "url": "http://localhost:4040/apps"}));

	let ops = [
		("click", json!({"selector": "#save"})),
		("type", json!({"selector": "#name", "text": "Ada", "clear": true})),
		("wait", json!({"selector": ".row"})),
		("reload", json!({})),
	];
	for (op, body) in ops {
		let (status, resp) = send(&app, Method::POST, &format!("/session/{id}/{op}"), Some(body)).await;
		assert_eq!(status, StatusCode::OK, "{op}: {resp}");
		assert_eq!(resp["success"], true);
	}

	assert_eq!(
		page.calls(),
		vec![
			"goto http://localhost:4040/apps",
			"click #save",
			"replace #name Ada",
			"wait .row",
			"reload",
		]
	);
}

#[tokio::test]
async fn evaluate_and_query_return_data() {
	let (app, _, _) = app();
	let id = start_session(&app).await;

	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/evaluate"),
		Some(json!({"script": "document.title"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["result"], json!({"script": "document.title"}));

	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/evaluate"),
		Some(json!({"script": "throw new Error('x')"})),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["code"], "evaluation_failed");

	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/query"),
		Some(json!({"selector": "div"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["count"], 1);
	assert_eq!(body["elements"][0]["tag"], "div");
}

#[tokio::test]
async fn element_timeouts_map_to_408() {
	let (app, _, _) = app();
	let id = start_session(&app).await;
	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/click"),
		Some(json!({"selector": "#missing-button", "timeout": 50})),
	)
	.await;
	assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
	assert_eq!(body["code"], "timeout");
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
	let (app, _, _) = app();
	let id = start_session(&app).await;

	let (status, body) = send(&app, Method::POST, &format!("/session/{id}/navigate"), Some(json!({}))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["code"], "invalid_argument");

	let (status, body) = send(&app, Method::POST, &format!("/session/{id}/wait"), Some(json!({}))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body["error"].as_str().unwrap().contains("selector"));
}

#[tokio::test]
async fn screenshot_encodings() {
	let (app, _, backend) = app();
	let id = start_session(&app).await;

	let (status, body) = send(&app, Method::GET, &format!("/session/{id}/screenshot?fullPage=true"), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["mimeType"], "image/png");
	assert_eq!(body["data"], "iVBORw0KGgo=");

	let (status, content_type, bytes) = send_raw(
		&app,
		Method::GET,
		&format!("/session/{id}/screenshot?encoding=binary"),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(content_type.as_deref(), Some("image/png"));
	assert_eq!(bytes, PNG_SIGNATURE);

	assert_eq!(
		backend.last_launch().unwrap().calls(),
		vec!["screenshot full_page=true", "screenshot full_page=false"]
	);
}

#[tokio::test]
async fn screenshot_full_page_accepts_bare_flag() {
	let (app, _, backend) = app();
	let id = start_session(&app).await;

	for query in ["fullPage", "fullPage=1", "fullPage=0"] {
		let (status, body) = send(&app, Method::GET, &format!("/session/{id}/screenshot?{query}"), None).await;
		assert_eq!(status, StatusCode::OK, "{query}: {body}");
	}
	let (status, body) = send(&app, Method::GET, &format!("/session/{id}/screenshot?fullPage=maybe"), None).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["code"], "invalid_argument");

	assert_eq!(
		backend.last_launch().unwrap().calls(),
		vec![
			"screenshot full_page=true",
			"screenshot full_page=true",
			"screenshot full_page=false"
		]
	);
}

#[tokio::test]
async fn crashed_session_reports_inactive_and_refuses_work() {
	let (app, _, backend) = app();
	let id = start_session(&app).await;
	backend.last_launch().unwrap().crash();
	tokio::time::sleep(Duration::from_millis(50)).await;

	let (status, body) = send(&app, Method::GET, &format!("/session/{id}/status"), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["active"], false);

	let (status, body) = send(
		&app,
		Method::POST,
		&format!("/session/{id}/reload"),
		Some(json!({})),
	)
	.await;
	assert_eq!(status, StatusCode::GONE);
	assert_eq!(body["code"], "session_crashed");
}

#[tokio::test]
async fn servers_status_and_stop_with_nothing_running() {
	let (app, _, _) = app();
	let (status, body) = send(&app, Method::GET, "/servers/status", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({"backend": {"running": false}, "dashboard": {"running": false}}));

	let (status, body) = send(&app, Method::POST, "/servers/stop", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["success"], true);
}

#[tokio::test]
async fn cleanup_removes_every_session() {
	let (app, state, backend) = app();
	start_session(&app).await;
	start_session(&app).await;

	let (status, body) = send(&app, Method::POST, "/cleanup", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["sessionsCleaned"], 2);
	assert_eq!(state.sessions.session_count(), 0);
	assert!(backend.launches().iter().all(|b| b.is_browser_closed()));
}

#[tokio::test]
async fn ready_state_round_trip() {
	let (app, _, _) = app();
	let (status, body) = send(&app, Method::GET, "/ready", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["ready"], true);
	assert_eq!(body["state"], "ready");

	let (status, body) = send(
		&app,
		Method::PUT,
		"/ready",
		Some(json!({"state": "failed", "error": "bundle error"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["ready"], false);
	assert_eq!(body["error"], "bundle error");

	let (status, body) = send(&app, Method::GET, "/ready/wait?timeout=50", None).await;
	assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
	assert_eq!(body["code"], "timeout");

	send(&app, Method::PUT, "/ready", Some(json!({"state": "ready"}))).await;
	let (status, body) = send(&app, Method::GET, "/ready/wait?timeout=50", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["state"], "ready");
}

#[tokio::test]
async fn unknown_routes_are_json_404s() {
	let (app, _, _) = app();
	let (status, body) = send(&app, Method::GET, "/nowhere", None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["code"], "not_found");
}
