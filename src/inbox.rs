//! Hand-off between the transport callback and the handshake loop
//!
//! The MQTT stack delivers messages from its own task, while the handshake
//! polls for replies from the main loop. The inbox is the only state they
//! share: a small bounded FIFO behind a mutex. When it is full the oldest
//! message is dropped, so a burst of stale replies cannot block a fresh one.

use std::sync::{Arc, Mutex, MutexGuard};

use heapless::Deque;
use log::warn;

/// Messages retained before the oldest is dropped
pub const INBOX_DEPTH: usize = 4;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Inbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text; replies from the service are UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct Slots {
    queue: Deque<Inbound, INBOX_DEPTH>,
}

/// Cloneable handle to a shared inbox.
#[derive(Clone, Default)]
pub struct Inbox {
    inner: Arc<Mutex<Slots>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the transport side.
    pub fn push(&self, message: Inbound) {
        let mut slots = self.lock();
        if slots.queue.is_full() {
            if let Some(dropped) = slots.queue.pop_front() {
                warn!("inbox full, dropping message on {}", dropped.topic);
            }
        }
        // Cannot fail: a slot was freed above if the queue was full.
        let _ = slots.queue.push_back(message);
    }

    /// Oldest undelivered message, if any.
    pub fn take(&self) -> Option<Inbound> {
        self.lock().queue.pop_front()
    }

    /// Discard anything left over from a previous exchange.
    pub fn clear(&self) {
        self.lock().queue.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panic while holding the lock leaves the queue itself consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl core::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inbox")
            .field("pending", &self.len())
            .finish()
    }
}
