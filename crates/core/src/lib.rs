//! Development-time browser control.
//!
//! - [`SessionManager`]: a bounded pool of isolated browser sessions with
//!   idle eviction and crash cleanup
//! - [`ServerOrchestrator`]: the backend API process and the dashboard server
//! - [`probe`]: TCP and HTTP health probing
//! - [`ReadyState`]: build readiness reported by an external watcher
//!
//! Session events are published through [`SessionManager::subscribe`]; the
//! returned [`Subscription`] unsubscribes on drop.

pub mod config;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod probe;
pub mod ready;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{OrchestratorConfig, SessionConfig};
pub use error::{Error, Result};
pub use handlers::Subscription;
pub use orchestrator::{ProcessPhase, ServerOrchestrator};
pub use probe::{available_port, is_port_open, poll_health_url};
pub use ready::ReadyState;
pub use session::{
	BrowserBackend, ChromiumBackend, SessionEvent, SessionEventKind, SessionHandle, SessionManager, SessionSlot,
	SessionState,
};
