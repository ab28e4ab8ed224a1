//! # Feed Links
//!
//! The transport seam of the ingestor. A [`Connector`] dials the feed endpoint
//! and yields a [`FeedLink`], a source of [`TransportEvent`]s that can be
//! closed. The connection manager only ever sees these traits, so the same
//! state machine runs over a WebSocket ([`super::feed_wss::WsConnector`]) or
//! over an in-process channel ([`ChannelConnector`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::model::detection::Detection;

/// What a live link can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text payload, expected to hold a JSON detection.
    Message(String),
    /// The peer closed the link, optionally saying why.
    Closed(Option<String>),
    /// The link failed; it is unusable from here on.
    Failed(String),
}

pub type LinkFuture = BoxFuture<'static, Result<Box<dyn FeedLink>, TransportError>>;

/// Dials the feed endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> LinkFuture;
}

/// One open connection.
pub trait FeedLink: Send {
    /// Waits for the next event; `None` means the link ended. Dropping the
    /// returned future before it completes must not lose an event.
    fn next_event(&mut self) -> BoxFuture<'_, Option<TransportEvent>>;

    /// Closes the link from our side.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

enum Dial {
    Accept(ChannelLink),
    Refuse(String),
    Hang,
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Dial>,
    dials: Vec<Instant>,
}

/// In-process connector. Each dial consumes the next scripted outcome;
/// an empty script refuses the dial.
///
/// Useful for replaying recorded feeds and for driving the controller from
/// tests without a network.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    script: Arc<Mutex<Script>>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next dial succeeds; the returned handle feeds that link.
    pub fn accept(&self) -> LinkHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let link = ChannelLink {
            rx,
            closed: Arc::clone(&closed),
        };
        self.push(Dial::Accept(link));
        LinkHandle { tx, closed }
    }

    /// The next dial fails with `reason`.
    pub fn refuse(&self, reason: &str) {
        self.push(Dial::Refuse(reason.to_string()));
    }

    /// The next dial never completes.
    pub fn hang(&self) {
        self.push(Dial::Hang);
    }

    /// When each dial happened, oldest first.
    pub fn dials(&self) -> Vec<Instant> {
        self.lock().dials.clone()
    }

    pub fn dial_count(&self) -> usize {
        self.lock().dials.len()
    }

    fn push(&self, dial: Dial) {
        self.lock().queue.push_back(dial);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // The script holds plain data; a panic elsewhere cannot leave it torn.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connector for ChannelConnector {
    fn connect(&self, url: &str) -> LinkFuture {
        let next = {
            let mut script = self.lock();
            script.dials.push(Instant::now());
            script.queue.pop_front()
        };
        match next {
            Some(Dial::Accept(link)) => {
                let link: Box<dyn FeedLink> = Box::new(link);
                future::ready(Ok(link)).boxed()
            }
            Some(Dial::Refuse(reason)) => future::ready(Err(TransportError::Open {
                url: url.to_string(),
                reason,
            }))
            .boxed(),
            Some(Dial::Hang) => future::pending().boxed(),
            None => future::ready(Err(TransportError::Open {
                url: url.to_string(),
                reason: "no peer scripted".to_string(),
            }))
            .boxed(),
        }
    }
}

/// The peer side of a [`ChannelConnector`] link. Dropping it ends the link.
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl LinkHandle {
    /// Pushes a raw text payload. Returns `false` once our side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(TransportEvent::Message(text.into())).is_ok()
    }

    pub fn send_detection(&self, detection: &Detection) -> bool {
        match serde_json::to_string(detection) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Closes the link from the peer side.
    pub fn close(&self, reason: Option<&str>) {
        let _ = self.tx.send(TransportEvent::Closed(reason.map(str::to_string)));
    }

    /// Fails the link from the peer side.
    pub fn fail(&self, error: &str) {
        let _ = self.tx.send(TransportEvent::Failed(error.to_string()));
    }

    /// Whether our side still holds the link open.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

struct ChannelLink {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl FeedLink for ChannelLink {
    fn next_event(&mut self) -> BoxFuture<'_, Option<TransportEvent>> {
        self.rx.recv().boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.closed.store(true, Ordering::SeqCst);
        future::ready(()).boxed()
    }
}

impl Drop for ChannelLink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
