//! Thread-safe request-id generator.
//!
//! # What is a request id? (for beginners)
//!
//! Replies to `method` and `sub` commands arrive asynchronously, interleaved
//! with server pushes.  To know which reply belongs to which request, every
//! identity-bearing command carries an `id` and the server echoes it back in
//! its reply.  An id must therefore never be handed out twice while the
//! process is alive, otherwise a late reply could be delivered to the wrong
//! caller.
//!
//! # Thread safety
//!
//! The generator uses `AtomicU64` internally.  An atomic `fetch_add` reads,
//! modifies and writes the value as one indivisible step, so two worker tasks
//! calling [`RequestIdGenerator::next_id`] at the same moment can never observe
//! the same value.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, strictly increasing source of request ids.
///
/// The generator starts at 0; the first id handed out is 1, the second 2, and
/// so on.  Ids are never reused for the lifetime of the generator, including
/// across reconnects (the session owns a single generator).
///
/// # Examples
///
/// ```rust
/// use rcbot_core::protocol::RequestIdGenerator;
///
/// let ids = RequestIdGenerator::new();
/// assert_eq!(ids.next_id(), 1);
/// assert_eq!(ids.next_id(), 2);
/// assert_eq!(ids.last_issued(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    /// Last id handed out; 0 means none yet.
    last: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a new generator starting at 0.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Atomically increments the generator and returns the new value.
    ///
    /// # Atomic ordering
    ///
    /// `Ordering::Relaxed` is sufficient: the id is only used as a correlation
    /// key, it does not publish any other memory to the reading thread.
    pub fn next_id(&self) -> u64 {
        // `fetch_add` returns the previous value, so add one to get the id we
        // just reserved.
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the most recently issued id (0 if none) without incrementing.
    ///
    /// Diagnostic only: another thread may issue a newer id at any moment.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_issued_id_is_one() {
        // Arrange
        let ids = RequestIdGenerator::new();

        // Act
        let first = ids.next_id();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        // Arrange
        let ids = RequestIdGenerator::new();

        // Act
        let values: Vec<u64> = (0..100).map(|_| ids.next_id()).collect();

        // Assert
        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must be strictly increasing");
        }
    }

    #[test]
    fn test_ids_are_unique_across_threads() {
        // Arrange
        let ids = Arc::new(RequestIdGenerator::new());
        let thread_count = 8;
        let per_thread = 1000;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..per_thread).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
        assert!(!all.contains(&0), "0 is never issued");
    }

    #[test]
    fn test_last_issued_does_not_increment() {
        // Arrange
        let ids = RequestIdGenerator::new();
        ids.next_id();

        // Act
        let last = ids.last_issued();
        let next = ids.next_id();

        // Assert
        assert_eq!(last, 1);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_default_matches_new() {
        let ids = RequestIdGenerator::default();
        assert_eq!(ids.last_issued(), 0);
        assert_eq!(ids.next_id(), 1);
    }
}
