//! Cross-context access to a scheduler.
//!
//! [`SchedulerProxy`] lets code on one execution context (the caller's) drive
//! a scheduler that lives on another (the scheduler's). Every operation is
//! posted to the scheduler's context in call order, and every completion is
//! posted back to the caller's context before `on_done` runs. The proxy never
//! blocks and never touches the scheduler directly.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::bound::ContextBound;
use crate::context::TaskRunner;
use crate::scheduler::{DoneCallback, FrameScheduler};

pub struct SchedulerProxy<S: 'static> {
    scheduler: ContextBound<S>,
    reply_runner: Arc<dyn TaskRunner>,
}

impl<S: 'static> SchedulerProxy<S> {
    /// Build the scheduler on `scheduler_runner`'s context with `make`.
    ///
    /// Completions are delivered through `reply_runner`, which should be the
    /// caller's own context.
    pub fn new<M>(
        scheduler_runner: Arc<dyn TaskRunner>,
        reply_runner: Arc<dyn TaskRunner>,
        make: M,
    ) -> Self
    where
        M: FnOnce() -> S + Send + 'static,
    {
        Self::from_bound(ContextBound::new(scheduler_runner, make), reply_runner)
    }

    /// Wrap a scheduler that is already bound to its context.
    #[must_use]
    pub fn from_bound(scheduler: ContextBound<S>, reply_runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            scheduler,
            reply_runner,
        }
    }

    /// Run `call` against the scheduler on its own context, after every
    /// operation posted before it.
    pub fn with_scheduler<C>(&self, call: C)
    where
        C: FnOnce(&mut S) + Send + 'static,
    {
        self.scheduler.post(call);
    }
}

impl<F, S> FrameScheduler<F> for SchedulerProxy<S>
where
    F: Send + 'static,
    S: FrameScheduler<F> + 'static,
{
    fn schedule(&mut self, frame: F, deadline: Instant, on_done: DoneCallback<F>) {
        let reply_runner = Arc::clone(&self.reply_runner);
        let relay: DoneCallback<F> = Box::new(move |frame, outcome| {
            reply_runner.post(Box::new(move || on_done(frame, outcome)));
        });
        self.scheduler
            .post(move |scheduler: &mut S| scheduler.schedule(frame, deadline, relay));
    }

    fn reset(&mut self) {
        self.scheduler.post(|scheduler: &mut S| scheduler.reset());
    }
}

impl<S: 'static> Drop for SchedulerProxy<S> {
    fn drop(&mut self) {
        debug!(scheduler = ?self.scheduler, "scheduler proxy dropped");
    }
}

impl<S: 'static> fmt::Debug for SchedulerProxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerProxy")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::TestTaskRunner;
    use crate::deadline::DeadlineScheduler;
    use crate::fake::FakeFrameScheduler;
    use crate::scheduler::FrameOutcome;
    use crate::timer::{MockTimer, OneShotTimer};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<(u32, FrameOutcome, bool, bool)>>>;

    /// Records the outcome plus which context observed it.
    fn observe(
        seen: &Seen,
        caller: &Arc<TestTaskRunner>,
        scheduler: &Arc<TestTaskRunner>,
    ) -> DoneCallback<u32> {
        let seen = Arc::clone(seen);
        let caller = Arc::clone(caller);
        let scheduler = Arc::clone(scheduler);
        Box::new(move |frame, outcome| {
            seen.lock().push((
                frame,
                outcome,
                caller.runs_tasks_in_current_sequence(),
                scheduler.runs_tasks_in_current_sequence(),
            ));
        })
    }

    #[test]
    fn completions_are_delivered_on_the_caller_context() {
        let caller = TestTaskRunner::new();
        let on_scheduler = TestTaskRunner::new();
        let clock = ManualClock::new();
        let timer = MockTimer::new();

        let core = DeadlineScheduler::new(|_: &u32| {}, clock.clone(), timer.clone());
        let bound = ContextBound::adopt(on_scheduler.clone(), core);
        let mut proxy = SchedulerProxy::from_bound(bound, caller.clone());

        let seen = Seen::default();
        proxy.schedule(
            1,
            clock.at(Duration::from_millis(10)),
            observe(&seen, &caller, &on_scheduler),
        );

        let queued = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&queued);
        proxy.with_scheduler(move |core: &mut DeadlineScheduler<u32>| {
            *slot.lock() = Some(core.pending_len());
        });
        assert_eq!(*queued.lock(), None);

        on_scheduler.run_until_idle();
        assert_eq!(*queued.lock(), Some(1));

        clock.advance_to(Duration::from_millis(10));
        assert!(timer.fire());
        assert!(seen.lock().is_empty());
        assert_eq!(caller.pending_len(), 1);

        caller.run_until_idle();
        assert_eq!(
            *seen.lock(),
            vec![(1, FrameOutcome::Displayed, true, false)]
        );
    }

    struct TrackedScheduler {
        inner: Box<dyn FrameScheduler<u32>>,
        runner: Arc<TestTaskRunner>,
        destroyed_on_owner: Arc<AtomicBool>,
    }

    impl FrameScheduler<u32> for TrackedScheduler {
        fn schedule(&mut self, frame: u32, deadline: Instant, on_done: DoneCallback<u32>) {
            self.inner.schedule(frame, deadline, on_done);
        }

        fn reset(&mut self) {
            self.inner.reset();
        }
    }

    impl Drop for TrackedScheduler {
        fn drop(&mut self) {
            self.destroyed_on_owner
                .store(self.runner.runs_tasks_in_current_sequence(), Ordering::SeqCst);
        }
    }

    #[test]
    fn scheduler_is_destroyed_on_its_own_context() {
        let caller = TestTaskRunner::new();
        let on_scheduler = TestTaskRunner::new();
        let destroyed = Arc::new(AtomicBool::new(false));

        let proxy = {
            let runner = Arc::clone(&on_scheduler);
            let destroyed = Arc::clone(&destroyed);
            SchedulerProxy::new(on_scheduler.clone(), caller.clone(), move || {
                TrackedScheduler {
                    inner: Box::new(FakeFrameScheduler::new()),
                    runner,
                    destroyed_on_owner: destroyed,
                }
            })
        };
        on_scheduler.run_until_idle();

        drop(proxy);
        assert!(!destroyed.load(Ordering::SeqCst));
        assert_eq!(on_scheduler.pending_len(), 1);

        on_scheduler.run_until_idle();
        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(caller.pending_len(), 0);
    }

    #[test]
    fn dropping_proxy_with_a_pending_frame_tears_down_on_scheduler_context() {
        let caller = TestTaskRunner::new();
        let on_scheduler = TestTaskRunner::new();
        let destroyed = Arc::new(AtomicBool::new(false));
        let clock = ManualClock::new();
        let timer = MockTimer::new();

        let tracked = TrackedScheduler {
            inner: Box::new(DeadlineScheduler::new(
                |_: &u32| {},
                clock.clone(),
                timer.clone(),
            )),
            runner: Arc::clone(&on_scheduler),
            destroyed_on_owner: Arc::clone(&destroyed),
        };
        let bound = ContextBound::adopt(on_scheduler.clone(), tracked);
        let mut proxy = SchedulerProxy::from_bound(bound, caller.clone());

        let seen = Seen::default();
        proxy.schedule(
            1,
            clock.at(Duration::from_millis(10)),
            observe(&seen, &caller, &on_scheduler),
        );
        on_scheduler.run_until_idle();
        assert!(timer.is_running());

        drop(proxy);
        assert!(!destroyed.load(Ordering::SeqCst));
        assert!(timer.is_running());

        on_scheduler.run_until_idle();
        assert!(destroyed.load(Ordering::SeqCst));
        assert!(!timer.is_running());

        clock.advance_to(Duration::from_millis(20));
        assert!(!timer.fire());
        assert_eq!(caller.run_until_idle(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn operations_reach_the_scheduler_in_call_order() {
        let caller = TestTaskRunner::new();
        let on_scheduler = TestTaskRunner::new();
        let fake = FakeFrameScheduler::<u32>::new();
        let handle = fake.clone();
        let mut proxy = SchedulerProxy::new(on_scheduler.clone(), caller.clone(), move || fake);

        let base = Instant::now();
        let seen = Seen::default();
        proxy.schedule(1, base, observe(&seen, &caller, &on_scheduler));
        proxy.reset();
        proxy.schedule(2, base, observe(&seen, &caller, &on_scheduler));
        proxy.schedule(3, base, observe(&seen, &caller, &on_scheduler));
        assert_eq!(handle.pending_len(), 0);

        on_scheduler.run_until_idle();
        assert_eq!(handle.pending_len(), 2);

        assert_eq!(handle.display_up_to(base), 2);
        assert!(seen.lock().is_empty());
        caller.run_until_idle();
        assert_eq!(
            *seen.lock(),
            vec![
                (2, FrameOutcome::Displayed, true, false),
                (3, FrameOutcome::Displayed, true, false),
            ]
        );
    }
}
