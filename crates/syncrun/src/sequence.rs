//! Sequence numbers for client-bound invocations.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Allocates strictly increasing sequence numbers, starting at 1.
///
/// Clones share one counter. A session owns its own sequencer unless it is
/// configured with one shared across sessions.
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: Arc<AtomicU64>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocates the next sequence number.
    ///
    /// Relaxed ordering is enough: read-modify-write operations on one atomic are
    /// totally ordered, so no two callers ever see the same number.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The number the next call to `next` would return, barring races.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Ensures every future number is greater than `seq`.
    pub fn advance_past(&self, seq: u64) {
        self.next.fetch_max(seq.saturating_add(1), Ordering::Relaxed);
    }

    /// True if both handles allocate from the same counter.
    pub fn shares_counter(&self, other: &Sequencer) -> bool {
        Arc::ptr_eq(&self.next, &other.next)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
