//! # feed_core
//!
//! Client-side controller for the live vehicle-detection feed. It keeps an
//! operator display in sync with detections pushed over a WebSocket, survives
//! connection loss, and bounds how much it holds in memory.
//!
//! The pieces, leaf-first:
//! - [`engine::feed_store::FeedStore`]: newest-first, capacity-bounded detections.
//! - [`engine::coalescer::UpdateCoalescer`]: quiescence window in front of the store.
//! - [`ingestors::connection::ConnectionManager`]: one logical connection with
//!   backoff-and-jitter reconnection.
//! - [`engine::lifecycle_gate::LifecycleGate`]: the cover screen state machine.
//! - [`engine::controller::FeedController`]: owns all of the above on one task.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

// Declare the modules to re-export
pub mod configs;
pub mod engine;
pub mod error;
pub mod ingestors;
pub mod model;
pub mod retrieve;

// Re-export the surface most embedders need
pub use configs::controller_config::{ControllerConfig, HttpOptions};
pub use engine::controller::FeedController;
pub use engine::feed_store::{FeedSnapshot, FeedStore};
pub use engine::lifecycle_gate::{CoverPolicy, GateState, GateTimeline, LifecycleGate};
pub use error::{ConfigError, CorrectionError, DecodeError, InitialFetchError, TransportError};
pub use ingestors::backoff::ReconnectPolicy;
pub use ingestors::connection::{ConnectionManager, ConnectionSignal, ConnectionState};
pub use ingestors::link::{ChannelConnector, Connector, FeedLink, TransportEvent};
#[cfg(feature = "wss")]
pub use ingestors::feed_wss::WsConnector;
pub use model::detection::{Detection, PlateCorrection, VehicleType};
