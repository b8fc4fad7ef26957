use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use dashctl::{OrchestratorConfig, SessionConfig};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "dashctl")]
#[command(about = "Development browser sessions and dashboard servers over HTTP")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control server
    Serve(ServeArgs),

    /// Show sessions and server status of a running instance
    Status(ClientArgs),

    /// Clean every session and stop the servers of a running instance
    Cleanup(ClientArgs),

    /// Stop the backend and dashboard of a running instance
    StopServers(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "DASHCTL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "DASHCTL_PORT", default_value_t = 9222)]
    pub port: u16,

    /// Maximum concurrent browser sessions
    #[arg(long, env = "DASHCTL_MAX_SESSIONS", default_value_t = 5)]
    pub max_sessions: usize,

    /// Evict sessions idle longer than this (milliseconds)
    #[arg(long, env = "DASHCTL_IDLE_TIMEOUT_MS", default_value_t = 1_800_000)]
    pub idle_timeout_ms: u64,

    /// How often idle sessions are swept (milliseconds)
    #[arg(long, env = "DASHCTL_SWEEP_INTERVAL_MS", default_value_t = 60_000)]
    pub sweep_interval_ms: u64,

    /// Delay before a crashed session is cleaned up (milliseconds)
    #[arg(long, env = "DASHCTL_CRASH_GRACE_MS", default_value_t = 5_000)]
    pub crash_grace_ms: u64,

    /// Force headless (true) or headed (false) browsers for every session
    #[arg(long, env = "DASHCTL_HEADLESS", value_parser = BoolishValueParser::new())]
    pub headless: Option<bool>,

    /// Default delay before every page operation (milliseconds)
    #[arg(long, env = "DASHCTL_SLOW_MO", default_value_t = 0)]
    pub slow_mo: u64,

    /// Browser executable; searched on PATH when unset
    #[arg(long, env = "DASHCTL_BROWSER", value_name = "PATH")]
    pub browser: Option<PathBuf>,

    /// Command that starts the backend API server
    #[arg(long, env = "DASHCTL_BACKEND_COMMAND", default_value = "npx parse-server")]
    pub backend_command: String,

    /// Backend port; a free port is picked when unset
    #[arg(long, env = "DASHCTL_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Dashboard port; a free port is picked when unset
    #[arg(long, env = "DASHCTL_DASHBOARD_PORT")]
    pub dashboard_port: Option<u16>,

    /// Database URI handed to the backend
    #[arg(long, env = "DASHCTL_DATABASE_URI", default_value = "mongodb://localhost:27017/dashctl")]
    pub database_uri: String,

    /// Directory with the built dashboard UI
    #[arg(long, env = "DASHCTL_DASHBOARD_ASSETS", value_name = "DIR")]
    pub dashboard_assets: Option<PathBuf>,
}

impl ServeArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_sessions: self.max_sessions,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            crash_grace: Duration::from_millis(self.crash_grace_ms),
            headless_override: self.headless,
            default_slow_mo: self.slow_mo,
            browser_executable: self.browser.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            backend_command: self.backend_command.split_whitespace().map(str::to_string).collect(),
            database_uri: self.database_uri.clone(),
            backend_port: self.backend_port,
            dashboard_port: self.dashboard_port,
            dashboard_assets: self.dashboard_assets.clone(),
            ..OrchestratorConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the running control server
    #[arg(long, env = "DASHCTL_URL", default_value = "http://127.0.0.1:9222")]
    pub url: Url,
}
