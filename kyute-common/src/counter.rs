//! Atomic counters
use std::{
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

/// An incrementing counter for generating unique ids.
///
/// This can be used safely from multiple threads, and from `static` items, which is how
/// identity handles of controls and aspect definitions are allocated.
///
/// The counter will overflow if `next()` is called 2^64 - 2 times.
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a new counter.
    pub const fn new() -> Counter {
        Counter(AtomicU64::new(1))
    }

    /// Return the next value.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Return the next value, as a `NonZeroU64`.
    pub fn next_nonzero(&self) -> NonZeroU64 {
        // starts at 1 and only increments
        NonZeroU64::new(self.next()).unwrap_or(NonZeroU64::MAX)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new()
    }
}
