//! Wire types for the dashctl control surface.
//!
//! Everything in this crate is plain serde data exchanged between the HTTP
//! API, the session event stream and CLI clients:
//! - **Sessions**: creation options, summaries, page automation bodies
//! - **Servers**: backend/dashboard options and status reports
//! - **Events**: messages pushed over `/stream/{session_id}`
//! - **Readiness**: build-state reports for `/ready`
//!
//! Field names are camelCase on the wire.

pub mod events;
pub mod ready;
pub mod servers;
pub mod session;
pub mod types;

pub use events::*;
pub use ready::*;
pub use servers::*;
pub use session::*;
pub use types::*;
