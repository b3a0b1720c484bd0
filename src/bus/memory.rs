//! In-process bus backend.
//!
//! Each topic is an append-only log with a bounded retention window. Every
//! consumer group keeps one read offset per topic, so subscriptions in the
//! same group compete for messages while separate groups each see all of
//! them. A new group starts at the oldest retained message.
//!
//! Closing the bus rejects further publishes and subscriptions; existing
//! subscriptions still receive what was retained before they end.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::bus::{BusError, BusMessage, MessageBus, Subscription};

/// Messages kept per topic when no retention is given.
pub const DEFAULT_RETENTION: usize = 10_000;

/// [`MessageBus`] living entirely inside the process.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicLog>>,
    closed: AtomicBool,
    /// Bumped on every publish and on close.
    wakeup: watch::Sender<u64>,
    retention: usize,
}

#[derive(Default)]
struct TopicLog {
    /// Offset of `messages[0]`.
    base: u64,
    messages: VecDeque<BusMessage>,
    offsets: HashMap<String, u64>,
}

impl TopicLog {
    fn next_for(&mut self, group: &str) -> Option<BusMessage> {
        let base = self.base;
        let offset = self.offsets.entry(group.to_string()).or_insert(base);
        if *offset < base {
            tracing::warn!(group, skipped = base - *offset, "Consumer fell behind retention window");
            *offset = base;
        }

        let index = usize::try_from(*offset - base).ok()?;
        let message = self.messages.get(index)?.clone();
        *offset += 1;
        Some(message)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Keep at most `retention` messages per topic (minimum 1).
    pub fn with_retention(retention: usize) -> Self {
        let (wakeup, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                wakeup,
                retention: retention.max(1),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of retained messages on `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .get(topic)
            .map_or(0, |log| log.messages.len())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.wakeup.send_modify(|n| *n = n.wrapping_add(1));
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        {
            let mut topics = self.inner.lock();
            let log = topics.entry(topic.to_string()).or_default();
            log.messages.push_back(message);
            while log.messages.len() > self.inner.retention {
                log.messages.pop_front();
                log.base += 1;
            }
        }

        self.inner.wake();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        {
            let mut topics = self.inner.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let base = log.base;
            log.offsets.entry(group.to_string()).or_insert(base);
        }

        tracing::debug!(topic, group, "Subscribed");
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            wakeup: self.inner.wakeup.subscribe(),
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.wake();
            tracing::debug!("In-memory bus closed");
        }
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    wakeup: watch::Receiver<u64>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        loop {
            // Mark the current value seen before looking, so a publish that
            // lands after the check still wakes `changed()`.
            self.wakeup.borrow_and_update();

            let next = self
                .inner
                .lock()
                .entry(self.topic.clone())
                .or_default()
                .next_for(&self.group);
            if next.is_some() {
                return Ok(next);
            }

            if self.inner.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            if self.wakeup.changed().await.is_err() {
                return Ok(None);
            }
        }
    }
}
