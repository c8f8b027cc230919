//! Timeline sink for per-tensor activity spans.
//!
//! The engine records stage-named device events only when a sink reports
//! itself initialized, so the untraced critical path pays no event cost.

/// Receives activity spans for the tensors of an in-flight batch.
pub trait Timeline: Send + Sync {
    /// Whether a sink is attached. When false, no stage events are recorded.
    fn initialized(&self) -> bool;

    /// Open an activity span covering every tensor of the batch.
    fn activity_start(&self, tensors: &[String], activity: &str);

    /// Close the currently open activity span.
    fn activity_end(&self, tensors: &[String]);

    /// Close a tensor's timeline row once its callback is about to fire.
    fn finish(&self, tensor: &str);
}

/// Disabled timeline.
pub struct NullTimeline;

impl Timeline for NullTimeline {
    fn initialized(&self) -> bool {
        false
    }

    fn activity_start(&self, _tensors: &[String], _activity: &str) {}

    fn activity_end(&self, _tensors: &[String]) {}

    fn finish(&self, _tensor: &str) {}
}

/// Timeline that emits `tracing` events at debug level.
pub struct TracingTimeline;

impl Timeline for TracingTimeline {
    fn initialized(&self) -> bool {
        true
    }

    fn activity_start(&self, tensors: &[String], activity: &str) {
        tracing::debug!(tensors = tensors.len(), activity, "activity start");
    }

    fn activity_end(&self, tensors: &[String]) {
        tracing::debug!(tensors = tensors.len(), "activity end");
    }

    fn finish(&self, tensor: &str) {
        tracing::debug!(tensor, "done");
    }
}
