//! Proxy tests over real threads
//!
//! The producer context is the test thread's `RunLoop`; the scheduler lives on
//! a second thread with its own loop, timed by the system clock.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use framesched_core::bound::ContextBound;
use framesched_core::context::TaskRunner;
use framesched_core::deadline::DeadlineScheduler;
use framesched_core::proxy::SchedulerProxy;
use framesched_core::run_loop::{RunLoop, RunLoopHandle};
use framesched_core::{FrameOutcome, FrameScheduler};
use parking_lot::Mutex;

type Shown = Arc<Mutex<Vec<(u32, ThreadId)>>>;

struct SchedulerThread {
    thread: JoinHandle<()>,
    handle: RunLoopHandle,
    bound: ContextBound<DeadlineScheduler<u32>>,
}

fn spawn_scheduler_thread(shown: Shown) -> SchedulerThread {
    let (tx, rx) = flume::bounded(1);
    let thread = thread::spawn(move || {
        let run_loop = RunLoop::new().unwrap();
        let runner: Arc<dyn TaskRunner> = Arc::new(run_loop.handle());
        let scheduler = DeadlineScheduler::on_current_loop(move |frame: &u32| {
            shown.lock().push((*frame, thread::current().id()));
        })
        .unwrap();
        tx.send((ContextBound::adopt(runner, scheduler), run_loop.handle()))
            .unwrap();
        run_loop.run();
    });
    let (bound, handle) = rx.recv().unwrap();
    SchedulerThread {
        thread,
        handle,
        bound,
    }
}

#[test]
fn frames_are_displayed_on_the_scheduler_thread_and_completed_on_the_caller() {
    let main_loop = RunLoop::new().unwrap();
    let shown = Shown::default();
    let SchedulerThread {
        thread: scheduler_thread,
        handle,
        bound,
    } = spawn_scheduler_thread(Arc::clone(&shown));
    let scheduler_thread_id = scheduler_thread.thread().id();
    let reply: Arc<dyn TaskRunner> = Arc::new(main_loop.handle());
    let mut proxy = SchedulerProxy::from_bound(bound, reply);

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let base = Instant::now();
    let total = 3;
    for (frame, at_ms) in [(1_u32, 20_u64), (2, 60), (3, 100)] {
        let outcomes = Arc::clone(&outcomes);
        let quit = main_loop.handle();
        proxy.schedule(
            frame,
            base + Duration::from_millis(at_ms),
            Box::new(move |frame, outcome| {
                let mut outcomes = outcomes.lock();
                outcomes.push((frame, outcome, thread::current().id()));
                if outcomes.len() == total {
                    quit.quit();
                }
            }),
        );
    }

    main_loop.run();

    let main_thread = thread::current().id();
    let outcomes = outcomes.lock().clone();
    assert_eq!(outcomes.len(), 3);
    for (_, outcome, thread) in &outcomes {
        assert_eq!(*outcome, FrameOutcome::Displayed);
        assert_eq!(*thread, main_thread);
    }
    let order: Vec<u32> = outcomes.iter().map(|(frame, _, _)| *frame).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert!(
        shown
            .lock()
            .iter()
            .all(|(_, thread)| *thread == scheduler_thread_id)
    );

    drop(proxy);
    handle.quit();
    scheduler_thread.join().unwrap();
}

#[test]
fn overdue_frames_posted_together_collapse_to_the_freshest() {
    let main_loop = RunLoop::new().unwrap();
    let shown = Shown::default();
    let SchedulerThread {
        thread: scheduler_thread,
        handle,
        bound,
    } = spawn_scheduler_thread(Arc::clone(&shown));
    let reply: Arc<dyn TaskRunner> = Arc::new(main_loop.handle());
    let mut proxy = SchedulerProxy::from_bound(bound, reply);

    // Keep the scheduler thread busy so every schedule lands in one batch.
    let (started_tx, started_rx) = flume::bounded::<()>(1);
    let (release_tx, release_rx) = flume::bounded::<()>(0);
    proxy.with_scheduler(move |_| {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    });
    started_rx.recv().unwrap();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let past = Instant::now()
        .checked_sub(Duration::from_millis(100))
        .unwrap_or_else(Instant::now);
    for (frame, offset_ms) in [(1_u32, 0_u64), (2, 10), (3, 20)] {
        let outcomes = Arc::clone(&outcomes);
        let quit = main_loop.handle();
        proxy.schedule(
            frame,
            past + Duration::from_millis(offset_ms),
            Box::new(move |frame, outcome| {
                let mut outcomes = outcomes.lock();
                outcomes.push((frame, outcome));
                if outcomes.len() == 3 {
                    quit.quit();
                }
            }),
        );
    }
    release_tx.send(()).unwrap();

    main_loop.run();

    assert_eq!(
        *outcomes.lock(),
        vec![
            (1, FrameOutcome::Dropped),
            (2, FrameOutcome::Dropped),
            (3, FrameOutcome::Displayed),
        ]
    );
    let shown_frames: Vec<u32> = shown.lock().iter().map(|(frame, _)| *frame).collect();
    assert_eq!(shown_frames, vec![3]);

    drop(proxy);
    handle.quit();
    scheduler_thread.join().unwrap();
}

#[test]
fn reset_through_the_proxy_discards_pending_frames() {
    let main_loop = RunLoop::new().unwrap();
    let shown = Shown::default();
    let SchedulerThread {
        thread: scheduler_thread,
        handle,
        bound,
    } = spawn_scheduler_thread(Arc::clone(&shown));
    let reply: Arc<dyn TaskRunner> = Arc::new(main_loop.handle());
    let mut proxy = SchedulerProxy::from_bound(bound, reply);

    let completions = Arc::new(Mutex::new(0_u32));
    let far = Instant::now() + Duration::from_secs(60);
    for frame in 0..4_u32 {
        let completions = Arc::clone(&completions);
        proxy.schedule(
            frame,
            far,
            Box::new(move |_, _| *completions.lock() += 1),
        );
    }
    proxy.reset();

    let (state_tx, state_rx) = flume::bounded(1);
    proxy.with_scheduler(move |scheduler: &mut DeadlineScheduler<u32>| {
        let _ = state_tx.send((
            scheduler.pending_len(),
            scheduler.is_armed(),
            scheduler.stats().discarded_by_reset,
        ));
    });
    let state = state_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(state, (0, false, 4));

    drop(proxy);
    handle.quit();
    scheduler_thread.join().unwrap();

    main_loop.run_until_idle();
    assert_eq!(*completions.lock(), 0);
    assert!(shown.lock().is_empty());
}
