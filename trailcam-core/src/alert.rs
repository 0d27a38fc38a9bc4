//! Alert gate: global cooldown that suppresses alerts caused by the gateway's own
//! sensor-processing noise. Plus the bounded most-recent-first history used for
//! accepted alerts and completed images.

use std::collections::VecDeque;

/// Any alert within this many ms of the last accepted one is dropped.
pub const DEFAULT_ALERT_COOLDOWN_MS: u64 = 3_000;

/// Single cooldown shared by all nodes. An alert from node B right after one
/// from node A is dropped too.
#[derive(Debug, Clone)]
pub struct AlertGate {
    cooldown_ms: u64,
    last_accepted: Option<u64>,
}

impl AlertGate {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            last_accepted: None,
        }
    }

    /// Returns true and restarts the cooldown if the alert is accepted.
    /// A clock that went backwards counts as inside the window.
    pub fn admit(&mut self, now_ms: u64) -> bool {
        if let Some(last) = self.last_accepted {
            if now_ms.saturating_sub(last) < self.cooldown_ms {
                return false;
            }
        }
        self.last_accepted = Some(now_ms);
        true
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN_MS)
    }
}

/// Most-recent-first list capped at `capacity`; the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct History<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
