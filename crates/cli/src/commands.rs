use anyhow::Result;
use dashctl::{ServerOrchestrator, SessionManager};
use serde::Serialize;
use serde_json::json;

use crate::api::AppState;
use crate::cli::{Cli, Commands, ServeArgs};
use crate::client::ControlClient;
use crate::server;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Serve(args) => serve(args).await,
		Commands::Status(args) => {
			let client = ControlClient::new(args.url);
			let (sessions, servers) = tokio::try_join!(client.sessions(), client.servers())?;
			print_json(&json!({ "sessions": sessions, "servers": servers }))
		}
		Commands::Cleanup(args) => print_json(&ControlClient::new(args.url).cleanup().await?),
		Commands::StopServers(args) => print_json(&ControlClient::new(args.url).stop_servers().await?),
	}
}

async fn serve(args: ServeArgs) -> Result<()> {
	let sessions = SessionManager::chromium(args.session_config());
	let servers = ServerOrchestrator::new(args.orchestrator_config());
	server::serve(AppState::new(sessions, servers), &args.host, args.port).await
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
