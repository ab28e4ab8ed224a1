//! # Feed Engine Module
//!
//! The state the display reads and the single task that mutates it.
//!
//! - **`feed_store`**: Newest-first, capacity-bounded list of detections plus
//!   the most recent one, published through a `watch` channel.
//! - **`coalescer`**: A quiescence window that turns a burst of arrivals into
//!   one store update.
//! - **`lifecycle_gate`**: The cover screen state machine.
//! - **`controller`**: The actor that owns all of the above together with the
//!   connection manager, and the handle embedders talk to.

/// Quiescence window in front of the store.
pub mod coalescer;
/// The actor task and its handle.
pub mod controller;
/// Bounded, newest-first detection store.
pub mod feed_store;
/// Cover screen sequencing.
pub mod lifecycle_gate;
