//! Fire-and-forget progress notifications.
//!
//! Multi-tile operations (cache stitching, whole-extent renders) report
//! how many units of work are done. Sinks only observe: there is no
//! acknowledgement and no way to push back or cancel.

use tracing::trace;

/// Receives progress updates.
///
/// Implemented for any `FnMut(usize, usize) + Send` closure.
///
/// ```rust
/// use tilechain_filters::ProgressSink;
///
/// let mut seen = Vec::new();
/// let mut sink = |done: usize, total: usize| seen.push((done, total));
/// sink.on_progress(1, 4);
/// assert_eq!(seen, vec![(1, 4)]);
/// ```
pub trait ProgressSink: Send {
    /// Called after each unit of work.
    ///
    /// * `completed` - Units completed so far
    /// * `total` - Total units
    fn on_progress(&mut self, completed: usize, total: usize);
}

impl<F: FnMut(usize, usize) + Send> ProgressSink for F {
    fn on_progress(&mut self, completed: usize, total: usize) {
        self(completed, total);
    }
}

/// Completion percentage in `[0, 100]`; 100 when `total` is zero.
#[inline]
pub fn percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        completed.min(total) as f64 * 100.0 / total as f64
    }
}

/// Sink that emits a `trace!` event per update.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceProgress;

impl ProgressSink for TraceProgress {
    fn on_progress(&mut self, completed: usize, total: usize) {
        trace!(completed, total, percent = percent(completed, total), "progress");
    }
}
