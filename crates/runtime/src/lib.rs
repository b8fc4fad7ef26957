//! Chromium runtime for dashctl.
//!
//! Drives a locally launched Chromium over the DevTools protocol:
//!
//! - **Launcher**: locating the browser executable and starting it with an
//!   isolated profile and a DevTools endpoint
//! - **Transport**: WebSocket framing of DevTools messages
//! - **Connection**: request/response correlation, per-target event routing,
//!   and disconnect notification
//! - **Page**: navigation, input, evaluation, screenshots, and page events
//!
//! ```text
//! ┌──────────┐  Target.attachToTarget  ┌────────────┐
//! │ Browser  │────────────────────────▶│    Page    │
//! └────┬─────┘                         └─────┬──────┘
//!      │ owns                                │ events
//! ┌────▼───────┐   ws frames   ┌───────────┐ │
//! │ Connection │◀─────────────▶│ Transport │ │
//! └────────────┘               └───────────┘ ▼
//!                                       PageEvent
//! ```

pub mod browser;
pub mod connection;
pub mod error;
pub mod events;
pub mod launcher;
pub mod page;
pub mod transport;

pub use browser::Browser;
pub use connection::{CdpEvent, Connection, Message, Request, Response};
pub use error::{Error, Result};
pub use events::{NetworkTracker, PageEvent};
pub use launcher::{LaunchOptions, find_browser_executable};
pub use page::Page;
pub use transport::{TransportParts, WebSocketTransport};
