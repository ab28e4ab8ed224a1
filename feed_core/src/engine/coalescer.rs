//! # Update Coalescer
//!
//! Sits between the connection and the feed store so that a burst of
//! detections produces one store update instead of one per message.
//!
//! There is a single quiescence window. Each `submit` restarts it and replaces
//! the pending payload; only when the window elapses untouched is the payload
//! released. Detections that are superseded inside a window are dropped, not
//! queued: a burst of arrivals less than `window` apart delivers only its last
//! element.
//!
//! The coalescer holds no timer of its own. The owner sleeps until
//! [`UpdateCoalescer::deadline`] and then calls [`UpdateCoalescer::take_due`].

use std::time::Duration;

use tokio::time::Instant;

use crate::model::detection::Detection;

/// Default quiescence window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct Pending {
    detection: Detection,
    deadline: Instant,
}

#[derive(Debug)]
pub struct UpdateCoalescer {
    window: Duration,
    pending: Option<Pending>,
    superseded: u64,
}

impl UpdateCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            superseded: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Starts a fresh window holding `detection`. Returns the payload it
    /// displaced, which is gone for good.
    pub fn submit(&mut self, detection: Detection, now: Instant) -> Option<Detection> {
        let displaced = self.pending.take().map(|p| p.detection);
        if let Some(old) = &displaced {
            self.superseded += 1;
            log::debug!("Coalescer dropped {} in favour of {}", old.id, detection.id);
        }
        self.pending = Some(Pending {
            detection,
            deadline: now + self.window,
        });
        displaced
    }

    /// When the pending payload becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hands over the pending payload once its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<Detection> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.pending.take().map(|p| p.detection),
            _ => None,
        }
    }

    /// Discards the pending payload so nothing is released after teardown.
    pub fn cancel(&mut self) -> Option<Detection> {
        self.pending.take().map(|p| p.detection)
    }

    /// Number of detections dropped by a newer arrival since creation.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}

impl Default for UpdateCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
