//! Scheduler that ignores deadlines.
//!
//! Useful where the caller already paces its frames and only needs a
//! scheduler-shaped sink: every frame is displayed as soon as it is
//! scheduled. The completion is still posted to the next turn of the
//! scheduler's context so callers never see `on_done` run inside `schedule`.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::context::TaskRunner;
use crate::scheduler::{DisplaySink, DoneCallback, FrameOutcome, FrameScheduler};

pub struct ClocklessScheduler<F> {
    display: Box<dyn DisplaySink<F>>,
    runner: Arc<dyn TaskRunner>,
    displayed: u64,
}

impl<F> ClocklessScheduler<F> {
    /// `runner` must be the execution context this scheduler is used on.
    pub fn new<D>(display: D, runner: Arc<dyn TaskRunner>) -> Self
    where
        D: DisplaySink<F> + 'static,
    {
        Self {
            display: Box::new(display),
            runner,
            displayed: 0,
        }
    }

    #[must_use]
    pub fn displayed(&self) -> u64 {
        self.displayed
    }
}

impl<F: Send + 'static> FrameScheduler<F> for ClocklessScheduler<F> {
    fn schedule(&mut self, frame: F, _deadline: Instant, on_done: DoneCallback<F>) {
        self.display.display(&frame);
        self.displayed += 1;
        trace!(displayed = self.displayed, "frame displayed without pacing");
        self.runner
            .post(Box::new(move || on_done(frame, FrameOutcome::Displayed)));
    }

    fn reset(&mut self) {}
}

impl<F> fmt::Debug for ClocklessScheduler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClocklessScheduler")
            .field("displayed", &self.displayed)
            .finish()
    }
}
