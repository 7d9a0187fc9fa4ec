//! Cancellation flag and live-helper accounting shared by a stage and its jobs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Monotone cancellation flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counts one live helper thread for as long as it is held.
///
/// A stage whose counter is non-zero is never reported idle.
#[derive(Debug)]
pub struct HelperGuard {
    live: Arc<AtomicUsize>,
}

impl HelperGuard {
    pub(crate) fn acquire(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_helper_guard_counts() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = HelperGuard::acquire(&live);
        let b = HelperGuard::acquire(&live);
        assert_eq!(live.load(Ordering::SeqCst), 2);
        drop(a);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
