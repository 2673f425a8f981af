//! Bounded record of already-processed message keys.
//!
//! The broker delivers at-least-once, so a consumer that must act at most
//! once per logical message keeps a window of seen keys and drops
//! redeliveries. The window is an explicit, injected value owned by the
//! consumer loop — there is no ambient global state — and its lifetime is
//! tied to the process: a restart clears it, and a redelivered message may
//! then be processed again. That loss is the accepted at-least-once
//! trade-off, not an error.
//!
//! Capacity is bounded with FIFO eviction so the window cannot grow without
//! limit under sustained traffic. Evicting a key re-opens the (small)
//! duplicate window for that one message, which is the same exposure a
//! restart already creates.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Default number of keys retained before the oldest is evicted.
pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

#[derive(Debug, Default)]
struct Window {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

/// Thread-safe, bounded seen-key set used to discard broker redeliveries.
///
/// Access is a plain mutual-exclusion region: the lock is held only for the
/// duration of a set lookup/mutation, never across I/O.
#[derive(Debug)]
pub struct DedupWindow {
    window: Mutex<Window>,
    capacity: usize,
}

impl DedupWindow {
    /// Create a window that retains at most `capacity` keys.
    ///
    /// A capacity of zero is treated as one: the window always remembers at
    /// least the most recent key.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            capacity: capacity.max(1),
        }
    }

    /// Record `key` as seen.
    ///
    /// Returns `true` if the key was not in the window (first sighting) and
    /// `false` for a duplicate. Inserting past capacity evicts the oldest
    /// retained key.
    pub fn insert(&self, key: &str) -> bool {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if window.seen.contains(key) {
            return false;
        }

        window.seen.insert(key.to_string());
        window.order.push_back(key.to_string());
        while window.order.len() > self.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.seen.remove(&oldest);
            }
        }
        true
    }

    /// Number of keys currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
