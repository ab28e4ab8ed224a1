//! # Feed Ingestors Module
//!
//! Everything between the remote detection feed and the controller: the
//! transport seam, the WebSocket client behind it, the backoff policy and the
//! connection manager that keeps exactly one link alive.
//!
//! ## Contained Modules:
//! - **`link`**: The `Connector`/`FeedLink` traits plus an in-process
//!   `ChannelConnector` for replay and tests.
//! - **`feed_wss`**: The tokio-tungstenite client for the live feed.
//! - **`backoff`**: Exponential reconnect delays with jitter.
//! - **`connection`**: The reconnecting connection state machine.

/// Exponential backoff with jitter for reconnect scheduling.
pub mod backoff;
/// Owns the dial, the open link and the reconnect timer.
pub mod connection;
/// The WebSocket client for the live detection feed.
#[cfg(feature = "wss")]
pub mod feed_wss;
/// Transport traits and the in-process connector.
pub mod link;

// --- Public API Re-exports ---
pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionManager, ConnectionSignal, ConnectionState};
#[cfg(feature = "wss")]
pub use feed_wss::WsConnector;
pub use link::{ChannelConnector, Connector, FeedLink, LinkHandle, TransportEvent};
