//! Progress reporting
//!
//! The engine emits one-way, best-effort events over a bounded channel:
//! workers never block on a slow observer, events are dropped when the
//! queue is full, and the final summary is delivered exactly once. The
//! console reporter renders the stream with indicatif bars.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Capacity of the outbound event queue
const EVENT_QUEUE_CAP: usize = 1024;

/// One progress event from the engine
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Totals discovered so far are unknown up front; the walker streams,
    /// so the reporter treats counts as open-ended until the summary.
    FileStarted {
        /// Relative path being processed
        path: String,
        /// File size in bytes
        size: u64,
    },
    /// Bytes written for the current file; one event per buffer chunk
    BytesCopied {
        /// Relative path
        path: String,
        /// Bytes written by this chunk
        bytes: u64,
    },
    /// A file finished (copied, skipped, or failed)
    FileFinished {
        /// Relative path
        path: String,
        /// Outcome label: "copied", "skipped", "failed", "mismatch"
        outcome: &'static str,
        /// Bytes moved for this file
        bytes: u64,
    },
    /// Final statistics; sent exactly once, last
    Summary {
        /// Files copied
        processed: u64,
        /// Files skipped
        skipped: u64,
        /// Files failed
        failed: u64,
        /// Total bytes moved
        bytes: u64,
    },
}

/// Sending half used by the engine.
///
/// `emit` never blocks; `finish` delivers the summary reliably and closes
/// the channel exactly once, guarded against racing closers.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Sender<ProgressEvent>,
    closed: Arc<AtomicBool>,
}

impl ProgressSender {
    /// Create a connected (sender, receiver) pair
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = bounded(EVENT_QUEUE_CAP);
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Best-effort emit: drops the event if the queue is full or closed
    pub fn emit(&self, event: ProgressEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Deliver the final summary and close the stream.
    ///
    /// The close is single-shot: a second caller observes the swapped
    /// guard and returns without sending, so the summary cannot be
    /// duplicated even when cancellation races normal completion.
    pub fn finish(&self, processed: u64, skipped: u64, failed: u64, bytes: u64) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Blocking send with a bounded wait: the summary must arrive, but a
        // wedged observer must not hang the engine forever.
        let _ = self.tx.send_timeout(
            ProgressEvent::Summary {
                processed,
                skipped,
                failed,
                bytes,
            },
            Duration::from_secs(5),
        );
    }
}

/// Console reporter: consumes the event stream on its own thread
pub struct ConsoleReporter {
    handle: JoinHandle<()>,
}

impl ConsoleReporter {
    /// Spawn a reporter over the given receiver
    pub fn spawn(rx: Receiver<ProgressEvent>) -> Self {
        let handle = std::thread::spawn(move || Self::run(rx));
        Self { handle }
    }

    /// Wait for the stream to close
    pub fn join(self) {
        let _ = self.handle.join();
    }

    fn run(rx: Receiver<ProgressEvent>) {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        status.enable_steady_tick(Duration::from_millis(120));

        let files_bar = multi.add(ProgressBar::new_spinner());
        files_bar.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {pos} files, {msg}")
                .expect("invalid template"),
        );
        files_bar.set_prefix("Done ");

        // Chunk events are the live byte source; they are best-effort, so
        // the count is approximate until the authoritative summary lands.
        let mut bytes_total = 0u64;
        for event in rx.iter() {
            match event {
                ProgressEvent::FileStarted { path, .. } => {
                    status.set_message(truncate_path(&path));
                }
                ProgressEvent::BytesCopied { bytes, .. } => {
                    bytes_total += bytes;
                    files_bar.set_message(humansize::format_size(
                        bytes_total,
                        humansize::BINARY,
                    ));
                }
                ProgressEvent::FileFinished { .. } => {
                    files_bar.inc(1);
                }
                ProgressEvent::Summary {
                    processed,
                    skipped,
                    failed,
                    bytes,
                } => {
                    status.finish_with_message(format!(
                        "{} copied, {} skipped, {} failed, {}",
                        processed,
                        skipped,
                        failed,
                        humansize::format_size(bytes, humansize::BINARY)
                    ));
                    files_bar.finish_and_clear();
                    break;
                }
            }
        }
    }
}

fn truncate_path(path: &str) -> String {
    if path.len() > 60 {
        format!("...{}", &path[path.len() - 57..])
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_never_blocks_when_full() {
        let (sender, _rx) = ProgressSender::channel();
        // Nobody drains; flooding past the capacity must not block.
        for i in 0..EVENT_QUEUE_CAP * 2 {
            sender.emit(ProgressEvent::FileStarted {
                path: format!("f{}", i),
                size: 0,
            });
        }
    }

    #[test]
    fn test_summary_delivered_exactly_once() {
        let (sender, rx) = ProgressSender::channel();
        sender.finish(1, 2, 3, 4);
        sender.finish(9, 9, 9, 9); // second close is a no-op

        let mut summaries = 0;
        for event in rx.try_iter() {
            if let ProgressEvent::Summary { processed, .. } = event {
                summaries += 1;
                assert_eq!(processed, 1);
            }
        }
        assert_eq!(summaries, 1);
    }

    #[test]
    fn test_emit_after_close_is_dropped() {
        let (sender, rx) = ProgressSender::channel();
        sender.finish(0, 0, 0, 0);
        sender.emit(ProgressEvent::FileStarted {
            path: "late".into(),
            size: 0,
        });
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Summary { .. }));
    }
}
