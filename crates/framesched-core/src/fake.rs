//! Test double for code that produces frames.
//!
//! [`FakeFrameScheduler`] never completes anything on its own. Tests decide
//! when time has reached a point and whether the frames due by then were
//! displayed or dropped. Unlike the deadline scheduler it does not pick a
//! single survivor: every selected frame gets the same outcome, in the order
//! it was scheduled.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::scheduler::{DoneCallback, FrameOutcome, FrameScheduler, PendingFrame};

/// Cloneable handle; clones share one pending list.
pub struct FakeFrameScheduler<F> {
    pending: Arc<Mutex<Vec<PendingFrame<F>>>>,
}

impl<F> FakeFrameScheduler<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Complete every frame due by `time` as displayed. Returns the count.
    pub fn display_up_to(&self, time: Instant) -> usize {
        self.complete_up_to(time, FrameOutcome::Displayed)
    }

    /// Complete every frame due by `time` as dropped. Returns the count.
    pub fn drop_up_to(&self, time: Instant) -> usize {
        self.complete_up_to(time, FrameOutcome::Dropped)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deadlines of pending frames, in scheduling order.
    #[must_use]
    pub fn pending_deadlines(&self) -> Vec<Instant> {
        self.pending
            .lock()
            .iter()
            .map(|pending| pending.deadline)
            .collect()
    }

    fn complete_up_to(&self, time: Instant, outcome: FrameOutcome) -> usize {
        // Completions run unlocked so callbacks can schedule again.
        let due: Vec<PendingFrame<F>> = {
            let mut pending = self.pending.lock();
            let (due, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|frame| frame.deadline <= time);
            *pending = remaining;
            due
        };
        let count = due.len();
        for frame in due {
            frame.complete(outcome);
        }
        count
    }
}

impl<F> Default for FakeFrameScheduler<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for FakeFrameScheduler<F> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<F> FrameScheduler<F> for FakeFrameScheduler<F> {
    fn schedule(&mut self, frame: F, deadline: Instant, on_done: DoneCallback<F>) {
        self.pending
            .lock()
            .push(PendingFrame::new(frame, deadline, on_done));
    }

    fn reset(&mut self) {
        let discarded = std::mem::take(&mut *self.pending.lock());
        drop(discarded);
    }
}

impl<F> fmt::Debug for FakeFrameScheduler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeFrameScheduler")
            .field("pending", &self.pending_len())
            .finish()
    }
}
