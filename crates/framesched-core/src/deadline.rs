//! Deadline scheduler: a min-queue of pending frames and one one-shot timer.
//!
//! The scheduler is Idle (nothing queued, timer stopped) or Armed (frames
//! queued, timer armed for the earliest deadline). When the timer fires,
//! every frame whose deadline has passed is taken off the queue. Only the
//! last of them, the one with the latest deadline, is displayed; the earlier
//! ones are completed as [`FrameOutcome::Dropped`]. A frame that is late but
//! alone is still displayed.
//!
//! Frames with equal deadlines leave the queue in scheduling order, so the
//! most recently scheduled of them is the one displayed.
//!
//! The scheduler is single-threaded (`!Send`). To drive it from another
//! thread, wrap it in a [`SchedulerProxy`](crate::proxy::SchedulerProxy).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::ContextError;
use crate::run_loop::LoopTimer;
use crate::scheduler::{DisplaySink, DoneCallback, FrameOutcome, FrameScheduler, PendingFrame};
use crate::stats::SchedulerStats;
use crate::timer::OneShotTimer;

struct QueuedFrame<F> {
    sequence: u64,
    pending: PendingFrame<F>,
}

impl<F> QueuedFrame<F> {
    fn key(&self) -> (Instant, u64) {
        (self.pending.deadline, self.sequence)
    }
}

impl<F> PartialEq for QueuedFrame<F> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<F> Eq for QueuedFrame<F> {}

impl<F> PartialOrd for QueuedFrame<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap yields the earliest (deadline, sequence) first.
impl<F> Ord for QueuedFrame<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct CoreState<F> {
    this: Weak<RefCell<CoreState<F>>>,
    clock: Box<dyn Clock>,
    timer: Box<dyn OneShotTimer>,
    display: Box<dyn DisplaySink<F>>,
    queue: BinaryHeap<QueuedFrame<F>>,
    next_sequence: u64,
    stats: SchedulerStats,
}

impl<F: 'static> CoreState<F> {
    /// Arm the timer for the earliest queued deadline, or stop it when the
    /// queue is empty.
    fn rearm(&mut self, now: Instant) {
        let Some(deadline) = self.queue.peek().map(|head| head.pending.deadline) else {
            if self.timer.is_running() {
                self.timer.stop();
            }
            trace!("scheduler idle");
            return;
        };
        let delay = deadline.saturating_duration_since(now);
        let this = self.this.clone();
        self.timer.start(
            delay,
            Box::new(move || {
                if let Some(state) = this.upgrade() {
                    on_timer_fired(&state);
                }
            }),
        );
        trace!(
            delay_us = delay.as_micros() as u64,
            pending = self.queue.len(),
            "timer armed"
        );
    }

    fn take_due(&mut self, now: Instant) -> Vec<PendingFrame<F>> {
        let mut due = Vec::new();
        while self
            .queue
            .peek()
            .is_some_and(|head| head.pending.deadline <= now)
        {
            if let Some(head) = self.queue.pop() {
                due.push(head.pending);
            }
        }
        due
    }
}

impl<F> Drop for CoreState<F> {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

fn on_timer_fired<F: 'static>(state: &Rc<RefCell<CoreState<F>>>) {
    let (mut due, now) = {
        let mut core = state.borrow_mut();
        let now = core.clock.now();
        (core.take_due(now), now)
    };
    let survivor = due.pop();

    if !due.is_empty() {
        state.borrow_mut().stats.dropped += due.len() as u64;
        debug!(dropped = due.len(), "superseded frames dropped");
    }
    for pending in due {
        pending.complete(FrameOutcome::Dropped);
    }

    if let Some(pending) = survivor {
        let lateness = now.saturating_duration_since(pending.deadline);
        {
            let mut core = state.borrow_mut();
            core.display.display(&pending.frame);
            core.stats.displayed += 1;
            core.stats.record_lateness(lateness);
        }
        trace!(lateness_us = lateness.as_micros() as u64, "frame displayed");
        pending.complete(FrameOutcome::Displayed);
    }

    let mut core = state.borrow_mut();
    let now = core.clock.now();
    core.rearm(now);
}

/// Timer-driven [`FrameScheduler`] that displays frames at their deadlines.
pub struct DeadlineScheduler<F: 'static> {
    state: Rc<RefCell<CoreState<F>>>,
}

impl<F: 'static> DeadlineScheduler<F> {
    pub fn new<D, C, T>(display: D, clock: C, timer: T) -> Self
    where
        D: DisplaySink<F> + 'static,
        C: Clock + 'static,
        T: OneShotTimer + 'static,
    {
        let state = Rc::new_cyclic(|this| {
            RefCell::new(CoreState {
                this: this.clone(),
                clock: Box::new(clock),
                timer: Box::new(timer),
                display: Box::new(display),
                queue: BinaryHeap::new(),
                next_sequence: 0,
                stats: SchedulerStats::default(),
            })
        });
        Self { state }
    }

    /// Scheduler on the calling thread's run loop, timed by the system clock.
    pub fn on_current_loop<D>(display: D) -> Result<Self, ContextError>
    where
        D: DisplaySink<F> + 'static,
    {
        Ok(Self::new(
            display,
            SystemClock::new(),
            LoopTimer::for_current_thread()?,
        ))
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Whether the timer is armed. Always equal to `pending_len() > 0`
    /// between operations.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.borrow().timer.is_running()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state
            .borrow()
            .queue
            .peek()
            .map(|head| head.pending.deadline)
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.state.borrow().stats
    }
}

impl<F: 'static> FrameScheduler<F> for DeadlineScheduler<F> {
    fn schedule(&mut self, frame: F, deadline: Instant, on_done: DoneCallback<F>) {
        let mut core = self.state.borrow_mut();
        let now = core.clock.now();
        let earliest = core
            .queue
            .peek()
            .is_none_or(|head| deadline < head.pending.deadline);

        let sequence = core.next_sequence;
        core.next_sequence += 1;
        core.queue.push(QueuedFrame {
            sequence,
            pending: PendingFrame::new(frame, deadline, on_done),
        });
        core.stats.scheduled += 1;
        trace!(
            sequence,
            overdue = deadline <= now,
            pending = core.queue.len(),
            "frame scheduled"
        );

        if earliest || !core.timer.is_running() {
            core.rearm(now);
        }
    }

    fn reset(&mut self) {
        let discarded = {
            let mut core = self.state.borrow_mut();
            let discarded = std::mem::take(&mut core.queue);
            core.timer.stop();
            core.stats.discarded_by_reset += discarded.len() as u64;
            discarded
        };
        if !discarded.is_empty() {
            debug!(discarded = discarded.len(), "scheduler reset");
        }
        drop(discarded);
    }
}

impl<F: 'static> fmt::Debug for DeadlineScheduler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineScheduler")
            .field("pending", &self.pending_len())
            .field("armed", &self.is_armed())
            .field("stats", &self.stats())
            .finish()
    }
}
