//! # Test Fixtures
//!
//! Local stand-ins for the detection backend, used by the integration tests
//! under `tests/`:
//!
//! - [`mock_api::MockApi`]: an axum server for `GET /api/vehicles` and
//!   `PATCH /api/vehicles/{id}/plate`.
//! - [`mock_feed::MockFeed`]: a tokio-tungstenite server that hands each
//!   accepted connection to the test.

use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};
use tokio::sync::watch;

pub mod mock_api;
pub mod mock_feed;

/// Upper bound for anything an integration test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A detection as the backend serializes it.
pub fn vehicle(id: &str, plate: &str) -> Value {
    json!({
        "vehicle_id": id,
        "vehicle_type": "car",
        "keyframe_url": format!("https://cdn.example.test/keyframes/{id}.jpg"),
        "plate_url": format!("https://cdn.example.test/plates/{id}.jpg"),
        "color": "white",
        "color_hex": "#f5f5f5",
        "vehicle_number": plate,
        "model": "Maruti",
        "location": "Main Gate",
        "timestamp": "2025-01-10 12:30:45.123456",
    })
}

/// Waits until `rx` holds a value matching `pred`, failing after [`WAIT`].
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, what: &str, pred: F) -> anyhow::Result<()>
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .map_err(|_| anyhow!("timed out waiting for {what}"))?
        .map_err(|_| anyhow!("channel closed while waiting for {what}"))?;
    Ok(())
}
