//! # Connection Manager
//!
//! Keeps one feed link alive. The manager owns the dial in flight, the open
//! link and the reconnect timer, and turns everything that happens on them into
//! a stream of [`ConnectionSignal`]s pulled through
//! [`ConnectionManager::next_signal`].
//!
//! - A successful open resets the attempt counter.
//! - A close, a link failure or a failed dial schedules exactly one reconnect;
//!   a second failure while a retry is already pending schedules nothing.
//! - Malformed payloads are logged and skipped; they never end the link.
//! - [`ConnectionManager::stop`] cancels the pending retry, drops the dial and
//!   closes the link. Nothing is dialled again until the next `start`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use super::backoff::ReconnectPolicy;
use super::link::{Connector, FeedLink, LinkFuture, TransportEvent};
use crate::error::{DecodeError, TransportError};
use crate::model::detection::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A retry is scheduled. `attempt` is the number of the dial it will make.
    Reconnecting { attempt: u32, next_delay_ms: u64 },
}

/// What the manager reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    Connected,
    Disconnected(TransportError),
    Detection(Detection),
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    rng: StdRng,
    enabled: bool,
    attempts: u32,
    malformed: u64,
    dial: Option<LinkFuture>,
    link: Option<Box<dyn FeedLink>>,
    retry_at: Option<Instant>,
    state: ConnectionState,
    publisher: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (publisher, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            url: url.into(),
            policy,
            rng: StdRng::from_os_rng(),
            enabled: false,
            attempts: 0,
            malformed: 0,
            dial: None,
            link: None,
            retry_at: None,
            state: ConnectionState::Disconnected,
            publisher,
        }
    }

    /// Replaces the jitter source with a seeded one, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.publisher.subscribe()
    }

    /// False before `start`, after `stop`, and once the attempt budget is spent.
    pub fn is_started(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Payloads skipped because they did not decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// When the pending reconnect fires, if one is scheduled.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Dials the feed. Does nothing while already started; after giving up it
    /// starts over with a fresh attempt budget.
    pub fn start(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.attempts = 0;
        self.dial_now();
    }

    /// Cancels any pending retry or dial and closes the link. Safe to call in
    /// any state, any number of times.
    pub async fn stop(&mut self) {
        self.enabled = false;
        self.retry_at = None;
        self.dial = None;
        if let Some(link) = self.link.take() {
            link.close().await;
            log::info!("Feed connection closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Waits for the next thing worth reporting. Pending forever while the
    /// manager is stopped or has given up.
    ///
    /// Cancel safe: the dial, the link and the retry deadline all live in
    /// `self`, so dropping this future loses nothing.
    pub async fn next_signal(&mut self) -> ConnectionSignal {
        loop {
            if let Some(dial) = self.dial.as_mut() {
                let outcome = dial.await;
                self.dial = None;
                match outcome {
                    Ok(link) => {
                        log::info!("Connected to detection feed: {}", self.url);
                        self.link = Some(link);
                        self.attempts = 0;
                        self.set_state(ConnectionState::Connected);
                        return ConnectionSignal::Connected;
                    }
                    Err(e) => {
                        log::warn!("{}", e);
                        self.schedule_reconnect();
                        return ConnectionSignal::Disconnected(e);
                    }
                }
            } else if let Some(link) = self.link.as_mut() {
                let error = match link.next_event().await {
                    Some(TransportEvent::Message(text)) => match Detection::from_json(&text) {
                        Ok(detection) => return ConnectionSignal::Detection(detection),
                        Err(e) => {
                            self.malformed += 1;
                            log::warn!("{}", DecodeError::new(&text, e));
                            continue;
                        }
                    },
                    Some(TransportEvent::Closed(reason)) => TransportError::Closed { reason },
                    Some(TransportEvent::Failed(e)) => TransportError::Protocol(e),
                    None => TransportError::Closed { reason: None },
                };
                self.link = None;
                log::warn!("{}", error);
                self.schedule_reconnect();
                return ConnectionSignal::Disconnected(error);
            } else if let Some(at) = self.retry_at {
                sleep_until(at).await;
                self.retry_at = None;
                self.attempts = self.attempts.saturating_add(1);
                log::info!("Reconnect attempt {} to {}", self.attempts, self.url);
                self.dial_now();
            } else {
                future::pending::<()>().await;
            }
        }
    }

    fn dial_now(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.dial = Some(self.connector.connect(&self.url));
    }

    /// Arms the reconnect timer unless one is already armed, a dial is in
    /// flight, the manager is stopped, or the attempt budget is spent.
    fn schedule_reconnect(&mut self) -> bool {
        if !self.enabled || self.retry_at.is_some() || self.dial.is_some() {
            return false;
        }
        if !self.policy.allows(self.attempts) {
            log::error!(
                "Giving up on {} after {} failed attempts",
                self.url,
                self.attempts
            );
            self.enabled = false;
            self.set_state(ConnectionState::Disconnected);
            return false;
        }
        let delay: Duration = self.policy.delay_for_attempt(self.attempts, &mut self.rng);
        self.retry_at = Some(Instant::now() + delay);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        log::info!("Reconnecting to {} in {}ms", self.url, delay_ms);
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempts.saturating_add(1),
            next_delay_ms: delay_ms,
        });
        true
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        log::debug!("Feed connection: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.publisher.send_replace(next);
    }
}
