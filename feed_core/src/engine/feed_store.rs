//! # Feed Store
//!
//! Newest-first, capacity-bounded collection of detections. It is the single
//! source of truth for "what has arrived" and the only object read by more
//! than one consumer, so every mutation publishes a fresh immutable
//! [`FeedSnapshot`] over a `watch` channel. A presenter holding an older
//! snapshot is never exposed to a half-applied change.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::detection::Detection;

/// Default number of detections kept in memory.
pub const DEFAULT_CAPACITY: usize = 100;

/// Immutable view of the store after one mutation.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// Head is the newest detection.
    pub items: Arc<[Detection]>,
    /// The last detection released by the coalescer, with its current fields.
    pub most_recent: Option<Detection>,
    /// Bumped on every published mutation.
    pub revision: u64,
}

impl FeedSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Detection> {
        self.items.iter().find(|d| d.id == id)
    }

    /// Ids head-to-tail; handy for logging and assertions.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Where a detection landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// New id, now at the head. Carries the id evicted from the tail, if any.
    Inserted { evicted: Option<String> },
    /// Existing id, replaced at this index.
    Updated { index: usize },
}

pub struct FeedStore {
    capacity: usize,
    items: VecDeque<Detection>,
    most_recent: Option<Detection>,
    revision: u64,
    publisher: watch::Sender<FeedSnapshot>,
}

impl FeedStore {
    /// Creates an empty store. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (publisher, _) = watch::channel(FeedSnapshot::default());
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity + 1),
            most_recent: None,
            revision: 0,
            publisher,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Receives a snapshot after every mutation. The current one is available
    /// immediately through `borrow()`.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.publisher.subscribe()
    }

    pub fn most_recent(&self) -> Option<&Detection> {
        self.most_recent.as_ref()
    }

    /// The current contents as an immutable snapshot.
    pub fn all(&self) -> FeedSnapshot {
        self.publisher.borrow().clone()
    }

    /// Replaces an existing record in place, or inserts a new one at the head
    /// and evicts the tail when over capacity.
    pub fn insert_or_update(&mut self, detection: Detection) -> Placement {
        let placement = self.apply(detection);
        self.publish();
        placement
    }

    /// Delivery path of the coalescer: store the detection and make it the
    /// most recent one, publishing a single snapshot.
    pub fn release(&mut self, detection: Detection) -> Placement {
        self.most_recent = Some(detection.clone());
        let placement = self.apply(detection);
        self.publish();
        placement
    }

    /// Pre-populates from a newest-first batch (the start-up snapshot). Does
    /// not touch the most-recent pointer. Returns how many records were kept.
    pub fn load(&mut self, batch: Vec<Detection>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        // Oldest first so the newest ends up at the head.
        for detection in batch.into_iter().take(self.capacity).rev() {
            self.apply(detection);
        }
        self.publish();
        self.items.len()
    }

    fn apply(&mut self, detection: Detection) -> Placement {
        if let Some(recent) = self.most_recent.as_mut() {
            if recent.id == detection.id {
                *recent = detection.clone();
            }
        }

        if let Some(index) = self.items.iter().position(|d| d.id == detection.id) {
            self.items[index] = detection;
            return Placement::Updated { index };
        }

        self.items.push_front(detection);
        let evicted = if self.items.len() > self.capacity {
            self.items.pop_back().map(|d| d.id)
        } else {
            None
        };
        if let Some(id) = &evicted {
            log::debug!("Feed store at capacity {}; evicted {}", self.capacity, id);
        }
        Placement::Inserted { evicted }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = FeedSnapshot {
            items: self.items.iter().cloned().collect(),
            most_recent: self.most_recent.clone(),
            revision: self.revision,
        };
        self.publisher.send_replace(snapshot);
    }
}
