//! Progress-callback trait for per-diagram conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the coordinator works through a document. The CLI uses this to
//! print one status line per diagram; library callers can forward events
//! anywhere without the library knowing how.
//!
//! # Example
//!
//! ```rust
//! use mermaid2png::{ConversionProgressCallback, ConversionConfig, ConversionTask};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_diagram_complete(&self, task: &ConversionTask, total: usize) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}/{total}: {}", task.image_path().display());
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ConversionTask;
use std::sync::Arc;

/// Called by the batch coordinator as it processes each diagram.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_diagram_complete` and `on_diagram_error` always
/// arrive in extraction order. With `concurrency > 1`, `on_diagram_start`
/// fires as each render begins, so several diagrams may be in flight.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after extraction, before any diagram is written.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a diagram's source file is written.
    fn on_diagram_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a diagram rendered to a non-empty image.
    fn on_diagram_complete(&self, task: &ConversionTask, total: usize) {
        let _ = (task, total);
    }

    /// Called when a diagram failed or timed out; `task.error()` is set.
    fn on_diagram_error(&self, task: &ConversionTask, total: usize) {
        let _ = (task, total);
    }

    /// Called once after every diagram has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::output::DiagramBlock;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_diagram_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_diagram_complete(&self, _task: &ConversionTask, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_diagram_error(&self, task: &ConversionTask, _total: usize) {
            assert!(task.error().is_some());
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    fn task(index: usize) -> ConversionTask {
        ConversionTask::new(
            DiagramBlock::new(index, "pie\n  \"a\": 1".into(), None),
            PathBuf::from("diagram.mmd"),
            PathBuf::from("diagram.png"),
        )
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let t = task(1);
        cb.on_batch_start(2);
        cb.on_diagram_start(1, 2);
        cb.on_diagram_complete(&t, 2);
        cb.on_diagram_error(&t, 2);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        let mut ok = task(1);
        ok.succeed();
        let mut bad = task(2);
        bad.fail(TaskError::EmptyOutput {
            index: 2,
            path: PathBuf::from("diagram.png"),
        });

        tracker.on_diagram_start(1, 2);
        tracker.on_diagram_complete(&ok, 2);
        tracker.on_diagram_start(2, 2);
        tracker.on_diagram_error(&bad, 2);
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.succeeded.load(Ordering::SeqCst), 1);
    }
}
