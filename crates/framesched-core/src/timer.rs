//! One-shot timer capability.
//!
//! A [`OneShotTimer`] holds at most one pending task. Starting it again
//! replaces the pending task; stopping it discards the task without running
//! it. Timers never run their task from inside `start`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Task run when a timer fires. Runs on the timer's own execution context.
pub type TimerTask = Box<dyn FnOnce() + 'static>;

pub trait OneShotTimer {
    /// Arm the timer to run `task` after `delay`, replacing any pending task.
    fn start(&mut self, delay: Duration, task: TimerTask);

    /// Disarm the timer. The pending task, if any, is dropped unrun.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Time left until the pending task fires, or `None` when idle.
    fn current_delay(&self) -> Option<Duration>;
}

#[derive(Default)]
struct MockTimerState {
    delay: Option<Duration>,
    task: Option<TimerTask>,
    starts: u64,
}

/// Timer that fires only when a test calls [`MockTimer::fire`].
///
/// Mock time never passes, so `current_delay` is the delay last armed.
///
/// Clones share state: hand one clone to the component under test and keep
/// another to observe and fire it.
#[derive(Clone, Default)]
pub struct MockTimer {
    state: Rc<RefCell<MockTimerState>>,
}

impl MockTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pending task, if any. Returns whether a task ran.
    pub fn fire(&self) -> bool {
        let task = {
            let mut state = self.state.borrow_mut();
            state.delay = None;
            state.task.take()
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Number of times the timer has been armed.
    #[must_use]
    pub fn start_count(&self) -> u64 {
        self.state.borrow().starts
    }
}

impl OneShotTimer for MockTimer {
    fn start(&mut self, delay: Duration, task: TimerTask) {
        let mut state = self.state.borrow_mut();
        state.delay = Some(delay);
        state.task = Some(task);
        state.starts += 1;
    }

    fn stop(&mut self) {
        let task = {
            let mut state = self.state.borrow_mut();
            state.delay = None;
            state.task.take()
        };
        drop(task);
    }

    fn is_running(&self) -> bool {
        self.state.borrow().task.is_some()
    }

    fn current_delay(&self) -> Option<Duration> {
        self.state.borrow().delay
    }
}

impl fmt::Debug for MockTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockTimer")
            .field("delay", &state.delay)
            .field("armed", &state.task.is_some())
            .field("starts", &state.starts)
            .finish()
    }
}
