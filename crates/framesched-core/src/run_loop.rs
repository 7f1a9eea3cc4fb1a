//! Thread-bound run loop.
//!
//! A [`RunLoop`] turns the thread that created it into an execution context.
//! Other threads reach it through a cloneable [`RunLoopHandle`] that posts
//! jobs over an unbounded channel, so posting never blocks. Timers armed on
//! the loop's own thread ([`LoopTimer`]) are kept in a local ordered map and
//! never leave that thread, which is what lets them run `!Send` tasks.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, trace};

use crate::context::{ContextScope, Job, TaskRunner, is_current_context, next_context_id};
use crate::error::ContextError;
use crate::timer::{OneShotTimer, TimerTask};

enum Message {
    Run(Job),
    Quit,
}

type DelayedKey = (Instant, u64);

#[derive(Default)]
struct DelayedTasks {
    tasks: RefCell<BTreeMap<DelayedKey, TimerTask>>,
    next_id: Cell<u64>,
}

impl DelayedTasks {
    fn insert(&self, run_at: Instant, task: TimerTask) -> DelayedKey {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let key = (run_at, id);
        self.tasks.borrow_mut().insert(key, task);
        key
    }

    fn cancel(&self, key: &DelayedKey) -> Option<TimerTask> {
        self.tasks.borrow_mut().remove(key)
    }

    fn contains(&self, key: &DelayedKey) -> bool {
        self.tasks.borrow().contains_key(key)
    }

    fn pop_due(&self, now: Instant) -> Option<TimerTask> {
        let mut tasks = self.tasks.borrow_mut();
        let key = *tasks.keys().next()?;
        if key.0 > now {
            return None;
        }
        tasks.remove(&key)
    }

    fn next_run_at(&self) -> Option<Instant> {
        self.tasks.borrow().keys().next().map(|(run_at, _)| *run_at)
    }

    fn len(&self) -> usize {
        self.tasks.borrow().len()
    }
}

thread_local! {
    static CURRENT_LOOP: RefCell<Weak<DelayedTasks>> = RefCell::new(Weak::new());
}

/// Event loop that owns the current thread's execution context.
pub struct RunLoop {
    id: u64,
    delayed: Rc<DelayedTasks>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl RunLoop {
    /// Bind a new run loop to the calling thread.
    ///
    /// Fails with [`ContextError::AlreadyBound`] while another `RunLoop`
    /// created on this thread is still alive.
    pub fn new() -> Result<Self, ContextError> {
        CURRENT_LOOP.with(|current| {
            if current.borrow().upgrade().is_some() {
                return Err(ContextError::AlreadyBound);
            }
            let delayed = Rc::new(DelayedTasks::default());
            *current.borrow_mut() = Rc::downgrade(&delayed);
            let (tx, rx) = flume::unbounded();
            let id = next_context_id();
            debug!(context = id, "run loop bound to thread");
            Ok(Self {
                id,
                delayed,
                tx,
                rx,
            })
        })
    }

    #[must_use]
    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            id: self.id,
            tx: self.tx.clone(),
        }
    }

    /// Run posted jobs and due timers until [`RunLoopHandle::quit`] is received.
    pub fn run(&self) {
        let _scope = ContextScope::enter(self.id);
        trace!(context = self.id, "run loop started");
        'run: loop {
            self.run_due_timers();
            let received = match self.delayed.next_run_at() {
                Some(run_at) => match self.rx.recv_deadline(run_at) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };
            // Jobs already queued behind it run before timers are checked again.
            let queued = self.rx.len();
            for message in std::iter::once(received).chain(self.rx.try_iter().take(queued)) {
                match message {
                    Message::Run(job) => job(),
                    Message::Quit => break 'run,
                }
            }
        }
        trace!(
            context = self.id,
            pending_timers = self.delayed.len(),
            "run loop stopped"
        );
    }

    /// Run everything that is ready right now without blocking: due timers
    /// and already-posted jobs. A pending quit request stops the pass early.
    /// Returns how many jobs and timer tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let _scope = ContextScope::enter(self.id);
        let mut ran = 0;
        loop {
            ran += self.run_due_timers();
            match self.rx.try_recv() {
                Ok(Message::Run(job)) => {
                    job();
                    ran += 1;
                }
                Ok(Message::Quit) | Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    return ran;
                }
            }
        }
    }

    fn run_due_timers(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.delayed.pop_due(Instant::now()) {
            task();
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("id", &self.id)
            .field("pending_jobs", &self.rx.len())
            .field("pending_timers", &self.delayed.len())
            .finish()
    }
}

/// Sendable handle for posting jobs to a [`RunLoop`].
#[derive(Clone)]
pub struct RunLoopHandle {
    id: u64,
    tx: Sender<Message>,
}

impl RunLoopHandle {
    /// Ask the loop to return from [`RunLoop::run`] once earlier jobs have run.
    pub fn quit(&self) {
        if self.tx.send(Message::Quit).is_err() {
            trace!(context = self.id, "quit sent to a run loop that is gone");
        }
    }
}

impl TaskRunner for RunLoopHandle {
    fn post(&self, job: Job) {
        if self.tx.send(Message::Run(job)).is_err() {
            trace!(context = self.id, "job posted to a run loop that is gone");
        }
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        is_current_context(self.id)
    }
}

impl fmt::Debug for RunLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoopHandle").field("id", &self.id).finish()
    }
}

/// [`OneShotTimer`] backed by the current thread's [`RunLoop`].
///
/// The task runs from the loop once its delay has elapsed. Dropping the
/// timer cancels the pending task.
pub struct LoopTimer {
    delayed: Weak<DelayedTasks>,
    armed: Option<DelayedKey>,
}

impl LoopTimer {
    /// Create a timer on the run loop bound to the calling thread.
    pub fn for_current_thread() -> Result<Self, ContextError> {
        let delayed = CURRENT_LOOP.with(|current| current.borrow().clone());
        if delayed.upgrade().is_none() {
            return Err(ContextError::NoRunLoop);
        }
        Ok(Self {
            delayed,
            armed: None,
        })
    }
}

impl OneShotTimer for LoopTimer {
    fn start(&mut self, delay: Duration, task: TimerTask) {
        self.stop();
        let Some(delayed) = self.delayed.upgrade() else {
            debug!("timer started after its run loop was dropped");
            return;
        };
        self.armed = Some(delayed.insert(Instant::now() + delay, task));
    }

    fn stop(&mut self) {
        let Some(key) = self.armed.take() else {
            return;
        };
        if let Some(delayed) = self.delayed.upgrade() {
            let cancelled = delayed.cancel(&key);
            drop(cancelled);
        }
    }

    fn is_running(&self) -> bool {
        self.armed.as_ref().is_some_and(|key| {
            self.delayed
                .upgrade()
                .is_some_and(|delayed| delayed.contains(key))
        })
    }

    fn current_delay(&self) -> Option<Duration> {
        if !self.is_running() {
            return None;
        }
        self.armed
            .map(|(run_at, _)| run_at.saturating_duration_since(Instant::now()))
    }
}

impl Drop for LoopTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LoopTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopTimer")
            .field("running", &self.is_running())
            .field("delay", &self.current_delay())
            .finish()
    }
}
