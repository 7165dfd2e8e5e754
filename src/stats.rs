//! Shared engine statistics
//!
//! A single aggregate mutated only through atomic increments, so the log
//! writer and the final summary can read it concurrently without locks.
//! All counters are monotone within a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic counters for one engine run
#[derive(Debug)]
pub struct SyncStats {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes_copied: AtomicU64,
    start: Instant,
}

impl SyncStats {
    /// Create a fresh counter set; the clock starts now
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Record one successfully copied file
    pub fn add_processed(&self, bytes: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one skipped file
    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one permanently failed file
    pub fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Files copied so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Files skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Files failed so far
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Bytes copied so far
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }

    /// Time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Average throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_copied() as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let stats = SyncStats::new();
        stats.add_processed(100);
        stats.add_processed(50);
        stats.add_skipped();
        stats.add_failed();

        assert_eq!(stats.processed(), 2);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.bytes_copied(), 150);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(SyncStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_processed(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.processed(), 8000);
        assert_eq!(stats.bytes_copied(), 8000);
    }
}
