//! The scheduler contract shared by every variant.
//!
//! Callers hand a scheduler `(frame, deadline, on_done)` triples. Each
//! scheduled frame is eventually completed exactly once with a
//! [`FrameOutcome`], unless [`FrameScheduler::reset`] discards it first.
//! `on_done` is never called before `schedule` returns.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Final fate of a scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOutcome {
    /// The frame was handed to the display sink.
    Displayed,
    /// A fresher due frame superseded this one; it was never shown.
    Dropped,
}

impl FrameOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Displayed => "displayed",
            Self::Dropped => "dropped",
        }
    }
}

impl fmt::Display for FrameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion callback for one scheduled frame. Receives the frame back.
pub type DoneCallback<F> = Box<dyn FnOnce(F, FrameOutcome) + Send + 'static>;

/// The display side effect. Called once per displayed frame, on the
/// scheduler's own execution context.
pub trait DisplaySink<F> {
    fn display(&mut self, frame: &F);
}

impl<F, T> DisplaySink<F> for T
where
    T: FnMut(&F),
{
    fn display(&mut self, frame: &F) {
        self(frame);
    }
}

/// Deadline-driven frame display.
pub trait FrameScheduler<F> {
    /// Queue `frame` for display at `deadline`. Deadlines in the past are
    /// accepted. `on_done` runs later, never from inside this call.
    fn schedule(&mut self, frame: F, deadline: Instant, on_done: DoneCallback<F>);

    /// Discard every pending frame without completing it. Idempotent.
    fn reset(&mut self);
}

impl<F, S> FrameScheduler<F> for Box<S>
where
    S: FrameScheduler<F> + ?Sized,
{
    fn schedule(&mut self, frame: F, deadline: Instant, on_done: DoneCallback<F>) {
        (**self).schedule(frame, deadline, on_done);
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

/// A scheduled frame waiting for its outcome.
pub(crate) struct PendingFrame<F> {
    pub(crate) frame: F,
    pub(crate) deadline: Instant,
    pub(crate) on_done: DoneCallback<F>,
}

impl<F> PendingFrame<F> {
    pub(crate) fn new(frame: F, deadline: Instant, on_done: DoneCallback<F>) -> Self {
        Self {
            frame,
            deadline,
            on_done,
        }
    }

    pub(crate) fn complete(self, outcome: FrameOutcome) {
        (self.on_done)(self.frame, outcome);
    }
}
