//! Cooperative cancellation
//!
//! A single token threads through the walker, copy workers, hashing and
//! the verifier. Cancellation is checked between buffer chunks; an
//! optional deadline arms a timer thread that fires the same flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that never fires on its own
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Arm a deadline: the token fires after `timeout` unless the process
    /// exits first. The timer thread is detached and polls so it does not
    /// outlive an early cancellation by more than one tick.
    pub fn arm_deadline(&self, timeout: Duration) {
        let token = self.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_millis(50);
            let mut remaining = timeout;
            while remaining > Duration::ZERO {
                if token.is_cancelled() {
                    return;
                }
                let step = tick.min(remaining);
                std::thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
            tracing::warn!(timeout_secs = timeout.as_secs(), "deadline exceeded, cancelling");
            token.cancel();
        });
    }

    /// Sleep in small increments, returning early if cancelled.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let tick = Duration::from_millis(50);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let step = tick.min(remaining);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_deadline_fires() {
        let token = CancelToken::new();
        token.arm_deadline(Duration::from_millis(20));
        assert!(!token.is_cancelled());
        std::thread::sleep(Duration::from_millis(200));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sleep_interrupted_by_cancel() {
        let token = CancelToken::new();
        let clone = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            clone.cancel();
        });
        let completed = token.sleep(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(!completed);
    }
}
