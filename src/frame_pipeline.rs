//! Outbound frame batching.
//!
//! Gameplay input arrives one frame at a time and leaves as
//! [`FrameDataBundle`]s. [`FramePipeline`] accumulates pending frames between
//! flushes and hands finished bundles to a send queue that preserves order
//! across failed sends: the head bundle is retried verbatim until the remote
//! accepts it, and nothing behind it is attempted in the meantime.
//!
//! Time never comes from a clock read inside this module; callers pass `now`
//! in, which keeps flush scheduling deterministic under test.

use std::collections::VecDeque;

use web_time::{Duration, Instant};

use crate::frames::{FrameDataBundle, ReplayFrame, Score};

/// Pending-frame accumulator plus the ordered bundle send queue.
#[derive(Debug)]
pub(crate) struct FramePipeline {
    pending: Vec<ReplayFrame>,
    queue: VecDeque<FrameDataBundle>,
    capacity: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl FramePipeline {
    pub(crate) fn new(capacity: usize, flush_interval: Duration) -> Self {
        Self {
            pending: Vec::new(),
            queue: VecDeque::new(),
            capacity,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Whether the accumulator has reached capacity. The caller flushes
    /// before pushing when this holds, so pending never exceeds capacity.
    pub(crate) fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub(crate) fn push(&mut self, frame: ReplayFrame) {
        self.pending.push(frame);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether a timed flush is due: frames are pending and the flush
    /// interval has elapsed since the last flush.
    pub(crate) fn should_flush(&self, now: Instant) -> bool {
        !self.pending.is_empty() && now.duration_since(self.last_flush) >= self.flush_interval
    }

    /// Bundles all pending frames under a snapshot of `score` and queues the
    /// bundle for sending. Does nothing when no frames are pending; the flush
    /// timer only advances on an actual flush.
    pub(crate) fn flush(&mut self, score: &Score, now: Instant) {
        if self.pending.is_empty() {
            return;
        }
        let frames = std::mem::take(&mut self.pending);
        self.queue.push_back(FrameDataBundle::new(score, frames));
        self.last_flush = now;
    }

    /// The bundle that must be sent next, if any.
    pub(crate) fn front(&self) -> Option<&FrameDataBundle> {
        self.queue.front()
    }

    /// Drops the head bundle after a successful send.
    pub(crate) fn pop_front(&mut self) -> Option<FrameDataBundle> {
        self.queue.pop_front()
    }

    /// Number of bundles waiting to be sent.
    pub(crate) fn queued_bundles(&self) -> usize {
        self.queue.len()
    }

    /// Restarts the flush timer after a connectivity drop. Pending frames and
    /// queued bundles survive the outage and resume once reconnected.
    pub(crate) fn note_disconnected(&mut self, now: Instant) {
        self.last_flush = now;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::frames::ReplayButtons;

    const INTERVAL: Duration = Duration::from_millis(200);

    fn frame(time: f64) -> ReplayFrame {
        ReplayFrame::new(time, 0.0, 0.0, ReplayButtons::NONE)
    }

    #[test]
    fn flush_waits_for_the_interval() {
        let start = Instant::now();
        let mut pipeline = FramePipeline::new(30, INTERVAL);
        pipeline.push(frame(0.0));

        assert!(!pipeline.should_flush(start));
        assert!(pipeline.should_flush(start + Duration::from_millis(250)));
    }

    #[test]
    fn empty_pipeline_never_flushes() {
        let start = Instant::now();
        let pipeline = FramePipeline::new(30, INTERVAL);
        assert!(!pipeline.should_flush(start + Duration::from_secs(10)));
    }

    #[test]
    fn flush_moves_all_pending_frames_into_one_bundle() {
        let start = Instant::now();
        let mut pipeline = FramePipeline::new(30, INTERVAL);
        pipeline.push(frame(0.0));
        pipeline.push(frame(16.0));
        pipeline.push(frame(33.0));

        let score = Score {
            combo: 5,
            ..Score::default()
        };
        pipeline.flush(&score, start + INTERVAL);

        assert!(!pipeline.has_pending());
        assert_eq!(pipeline.queued_bundles(), 1);
        let bundle = pipeline.front().unwrap();
        assert_eq!(bundle.frames.len(), 3);
        assert_eq!(bundle.header.combo, 5);
    }

    #[test]
    fn flush_without_pending_frames_leaves_the_timer_alone() {
        let start = Instant::now();
        let mut pipeline = FramePipeline::new(30, INTERVAL);

        // No-op flush long after construction.
        pipeline.flush(&Score::default(), start + Duration::from_secs(5));
        assert_eq!(pipeline.queued_bundles(), 0);

        // Had the no-op advanced the timer, this would not be due yet.
        pipeline.push(frame(0.0));
        assert!(pipeline.should_flush(start + Duration::from_secs(5)));
    }

    #[test]
    fn capacity_reports_full_at_the_limit() {
        let mut pipeline = FramePipeline::new(2, INTERVAL);
        assert!(!pipeline.is_full());
        pipeline.push(frame(0.0));
        assert!(!pipeline.is_full());
        pipeline.push(frame(16.0));
        assert!(pipeline.is_full());
    }

    #[test]
    fn queue_preserves_bundle_order() {
        let start = Instant::now();
        let mut pipeline = FramePipeline::new(30, INTERVAL);

        pipeline.push(frame(0.0));
        pipeline.flush(&Score::default(), start);
        pipeline.push(frame(100.0));
        pipeline.push(frame(116.0));
        pipeline.flush(&Score::default(), start + INTERVAL);

        assert_eq!(pipeline.queued_bundles(), 2);
        assert_eq!(pipeline.front().unwrap().frames.len(), 1);
        let head = pipeline.pop_front().unwrap();
        assert_eq!(head.frames.len(), 1);
        assert_eq!(pipeline.front().unwrap().frames.len(), 2);
    }

    #[test]
    fn disconnect_restarts_the_flush_timer_but_keeps_the_queue() {
        let start = Instant::now();
        let mut pipeline = FramePipeline::new(30, INTERVAL);
        pipeline.push(frame(0.0));
        pipeline.flush(&Score::default(), start);
        pipeline.push(frame(100.0));

        let outage = start + Duration::from_secs(3);
        pipeline.note_disconnected(outage);

        assert_eq!(pipeline.queued_bundles(), 1);
        assert!(pipeline.has_pending());
        assert!(!pipeline.should_flush(outage + Duration::from_millis(100)));
        assert!(pipeline.should_flush(outage + Duration::from_millis(250)));
    }
}
