//! Execution contexts.
//!
//! An execution context is a single-threaded place where jobs run one at a
//! time, in the order they were posted. Components that are not thread-safe
//! (the deadline scheduler in particular) live on exactly one context and are
//! only ever touched from jobs running there.
//!
//! This crate has no knowledge of how the embedding application drives its
//! threads; it only needs the [`TaskRunner::post`] capability. Two runners are
//! provided: [`RunLoop`](crate::run_loop::RunLoop) for real threads and
//! [`TestTaskRunner`] for tests that pump contexts by hand.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A unit of work posted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to post jobs onto one execution context.
///
/// Implementations must run every job on the same thread, in posting order,
/// and must never run a job from inside `post`.
pub trait TaskRunner: Send + Sync {
    /// Enqueue `job` for later execution. Never blocks.
    fn post(&self, job: Job);

    /// True while the calling code is running inside one of this context's jobs.
    fn runs_tasks_in_current_sequence(&self) -> bool;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

pub(crate) fn next_context_id() -> u64 {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn is_current_context(id: u64) -> bool {
    CURRENT_CONTEXT.with(|current| current.get() == Some(id))
}

/// Marks the current thread as running jobs for context `id` until dropped.
pub(crate) struct ContextScope {
    previous: Option<u64>,
}

impl ContextScope {
    pub(crate) fn enter(id: u64) -> Self {
        let previous = CURRENT_CONTEXT.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|current| current.set(self.previous));
    }
}

/// Runner whose jobs only run when the test pumps it.
///
/// Jobs execute on whichever thread calls [`run_pending`](Self::run_pending),
/// so a test can model several contexts on its own thread and decide exactly
/// when each one gets a turn.
pub struct TestTaskRunner {
    id: u64,
    queue: Mutex<VecDeque<Job>>,
}

impl TestTaskRunner {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_context_id(),
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the jobs that were queued when this call started. Jobs they post
    /// wait for the next call. Returns how many jobs ran.
    pub fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut *self.queue.lock());
        let count = jobs.len();
        let _scope = ContextScope::enter(self.id);
        for job in jobs {
            job();
        }
        count
    }

    /// Run jobs until the queue stays empty. Returns how many jobs ran.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_pending();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl TaskRunner for TestTaskRunner {
    fn post(&self, job: Job) {
        self.queue.lock().push_back(job);
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        is_current_context(self.id)
    }
}

impl fmt::Debug for TestTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestTaskRunner")
            .field("id", &self.id)
            .field("pending", &self.pending_len())
            .finish()
    }
}
