//! Process-wide artifact id counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing id source shared by every generation job.
///
/// Ids for a whole batch are reserved in one atomic step, so two jobs never
/// compute the same artifact id.
#[derive(Debug, Default)]
pub struct IdCounter {
    next: AtomicU64,
}

/// A contiguous block of reserved ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub len: u64,
}

impl IdRange {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.start && id < self.end()
    }

    pub fn iter(&self) -> std::ops::Range<u64> {
        self.start..self.end()
    }
}

impl IdCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Reserve `count` consecutive ids.
    pub fn reserve(&self, count: u64) -> IdRange {
        let start = self.next.fetch_add(count, Ordering::SeqCst);
        IdRange { start, len: count }
    }

    pub fn next_id(&self) -> u64 {
        self.reserve(1).start
    }

    /// The id the next reservation will start from.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reserve_is_contiguous() {
        let counter = IdCounter::starting_at(1);
        let a = counter.reserve(3);
        let b = counter.reserve(2);
        assert_eq!(a, IdRange { start: 1, len: 3 });
        assert_eq!(b.start, 4);
        assert_eq!(counter.peek(), 6);
        assert!(a.contains(3));
        assert!(!a.contains(4));
    }

    #[test]
    fn test_concurrent_reservations_never_overlap() {
        let counter = Arc::new(IdCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    (0..50)
                        .flat_map(|_| counter.reserve(3).iter())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), 8 * 50 * 3);
    }
}
