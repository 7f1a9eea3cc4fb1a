//! Producer/display simulation.
//!
//! The calling thread becomes the producer context: it paces frames with a
//! [`LoopTimer`], scheduling each one `lead` ahead of its deadline and
//! catching up on any it released late. A second thread hosts the scheduler
//! and the display sink on its own [`RunLoop`]. The two talk only through a
//! [`SchedulerProxy`].
//!
//! The display sink can be made to stall. While it is blocked the producer
//! keeps posting, so the frames that went stale reach the scheduler together
//! and all but the freshest are dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::bound::ContextBound;
use crate::clock::SystemClock;
use crate::clockless::ClocklessScheduler;
use crate::config::{SchedulerVariant, SimulationConfig};
use crate::context::TaskRunner;
use crate::deadline::DeadlineScheduler;
use crate::error::{ContextError, Error, Result};
use crate::proxy::SchedulerProxy;
use crate::run_loop::{LoopTimer, RunLoop, RunLoopHandle};
use crate::scheduler::{DoneCallback, FrameScheduler};
use crate::stats::SchedulerStats;
use crate::timer::OneShotTimer;

/// Frame payload carried through the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFrame {
    pub index: u64,
    pub deadline: Instant,
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub variant: SchedulerVariant,
    pub fps: u32,
    pub frames: u64,
    pub displayed: u64,
    pub dropped: u64,
    pub stalls: u64,
    pub elapsed_ms: u64,
    /// Worst real-time lateness observed by the display sink.
    pub max_display_lateness_us: u64,
    pub drop_ratio: f64,
    /// Counters kept by the scheduler itself.
    pub scheduler: Option<SchedulerStats>,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "variant:    {} ({} fps, {} frames)",
            self.variant, self.fps, self.frames
        )?;
        writeln!(f, "displayed:  {}", self.displayed)?;
        writeln!(
            f,
            "dropped:    {} ({:.1}%)",
            self.dropped,
            self.drop_ratio * 100.0
        )?;
        writeln!(f, "stalls:     {}", self.stalls)?;
        writeln!(
            f,
            "lateness:   {:.3}ms max",
            self.max_display_lateness_us as f64 / 1000.0
        )?;
        write!(f, "elapsed:    {}ms", self.elapsed_ms)?;
        if let Some(stats) = &self.scheduler {
            write!(f, "\nscheduler:  {stats}")?;
        }
        Ok(())
    }
}

/// The scheduler living on the display thread.
enum DisplayScheduler {
    Core(DeadlineScheduler<SimFrame>),
    Clockless(ClocklessScheduler<SimFrame>),
}

impl DisplayScheduler {
    fn stats(&self) -> SchedulerStats {
        match self {
            Self::Core(scheduler) => scheduler.stats(),
            Self::Clockless(scheduler) => SchedulerStats {
                scheduled: scheduler.displayed(),
                displayed: scheduler.displayed(),
                ..SchedulerStats::default()
            },
        }
    }
}

impl FrameScheduler<SimFrame> for DisplayScheduler {
    fn schedule(&mut self, frame: SimFrame, deadline: Instant, on_done: DoneCallback<SimFrame>) {
        match self {
            Self::Core(scheduler) => scheduler.schedule(frame, deadline, on_done),
            Self::Clockless(scheduler) => scheduler.schedule(frame, deadline, on_done),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Core(scheduler) => scheduler.reset(),
            Self::Clockless(scheduler) => scheduler.reset(),
        }
    }
}

type Tally = Arc<Mutex<SchedulerStats>>;

/// State shared by the producer and the display thread.
#[derive(Clone, Default)]
struct Shared {
    tally: Tally,
    stalls: Arc<AtomicU64>,
}

type DisplaySetup = std::result::Result<(ContextBound<DisplayScheduler>, RunLoopHandle), ContextError>;

/// Build the run loop and scheduler on the current (display) thread.
fn bind_display_context(
    config: &SimulationConfig,
    shared: Shared,
) -> std::result::Result<(RunLoop, ContextBound<DisplayScheduler>), ContextError> {
    let run_loop = RunLoop::new()?;
    let runner: Arc<dyn TaskRunner> = Arc::new(run_loop.handle());
    let stall_config = config.clone();
    let mut shown = 0_u64;
    let sink = move |frame: &SimFrame| {
        let lateness = Instant::now().saturating_duration_since(frame.deadline);
        shared.tally.lock().record_lateness(lateness);
        shown += 1;
        trace!(
            index = frame.index,
            lateness_us = lateness.as_micros() as u64,
            "frame shown"
        );
        if stall_config.stalls_after(shown) {
            shared.stalls.fetch_add(1, Ordering::Relaxed);
            debug!(
                index = frame.index,
                stall_ms = stall_config.stall_ms,
                "display stalled"
            );
            std::thread::sleep(stall_config.stall());
        }
    };
    let scheduler = match config.variant {
        SchedulerVariant::Core => DisplayScheduler::Core(DeadlineScheduler::new(
            sink,
            SystemClock::with_offset(config.clock_offset()),
            LoopTimer::for_current_thread()?,
        )),
        SchedulerVariant::Clockless => {
            DisplayScheduler::Clockless(ClocklessScheduler::new(sink, Arc::clone(&runner)))
        }
    };
    let bound = ContextBound::adopt(runner, scheduler);
    Ok((run_loop, bound))
}

fn spawn_display_thread(
    config: &SimulationConfig,
    shared: Shared,
) -> Result<(JoinHandle<()>, ContextBound<DisplayScheduler>, RunLoopHandle)> {
    let (setup_tx, setup_rx) = flume::bounded::<DisplaySetup>(1);
    let config = config.clone();

    let thread = std::thread::Builder::new()
        .name("framesched-display".to_string())
        .spawn(move || match bind_display_context(&config, shared) {
            Ok((run_loop, bound)) => {
                if setup_tx.send(Ok((bound, run_loop.handle()))).is_ok() {
                    run_loop.run();
                }
            }
            Err(err) => {
                let _ = setup_tx.send(Err(err));
            }
        })
        .map_err(|err| Error::Simulation(format!("failed to spawn display thread: {err}")))?;

    match setup_rx.recv() {
        Ok(Ok((bound, handle))) => Ok((thread, bound, handle)),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err.into())
        }
        Err(_) => {
            let _ = thread.join();
            Err(Error::Simulation(
                "display thread exited during setup".to_string(),
            ))
        }
    }
}

/// Paces frames on the producer context.
struct Producer {
    this: Weak<RefCell<Producer>>,
    config: SimulationConfig,
    proxy: SchedulerProxy<DisplayScheduler>,
    timer: LoopTimer,
    tally: Tally,
    quit: RunLoopHandle,
    origin: Instant,
    next_index: u64,
}

impl Producer {
    /// When frame `index` is handed to the scheduler.
    fn release_time(&self, index: u64) -> Instant {
        self.origin + self.config.deadline_offset(index)
    }

    fn deadline(&self, index: u64) -> Instant {
        self.release_time(index) + self.config.lead()
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let first = self.next_index;
        while self.next_index < self.config.frames && self.release_time(self.next_index) <= now {
            self.schedule_next();
        }
        if self.next_index - first > 1 {
            debug!(
                from = first,
                count = self.next_index - first,
                "producer caught up"
            );
        }

        if self.next_index < self.config.frames {
            let delay = self
                .release_time(self.next_index)
                .saturating_duration_since(now);
            let this = self.this.clone();
            self.timer.start(
                delay,
                Box::new(move || {
                    if let Some(producer) = this.upgrade() {
                        producer.borrow_mut().tick();
                    }
                }),
            );
        } else {
            debug!(frames = self.config.frames, "all frames scheduled");
        }
    }

    fn schedule_next(&mut self) {
        let index = self.next_index;
        self.next_index += 1;
        let deadline = self.deadline(index);
        self.tally.lock().scheduled += 1;

        let tally = Arc::clone(&self.tally);
        let quit = self.quit.clone();
        let frames = self.config.frames;
        self.proxy.schedule(
            SimFrame { index, deadline },
            deadline,
            Box::new(move |frame, outcome| {
                let completed = {
                    let mut tally = tally.lock();
                    tally.record(outcome);
                    tally.completed()
                };
                trace!(index = frame.index, %outcome, "frame completed");
                if completed == frames {
                    quit.quit();
                }
            }),
        );
    }
}

/// Run one simulation on the calling thread.
///
/// The calling thread must not already have a [`RunLoop`].
pub fn run(config: &SimulationConfig) -> Result<SimulationReport> {
    config.validate()?;
    let main_loop = RunLoop::new()?;
    let shared = Shared::default();

    let (display_thread, bound, display_handle) = spawn_display_thread(config, shared.clone())?;
    let reply: Arc<dyn TaskRunner> = Arc::new(main_loop.handle());
    let proxy = SchedulerProxy::from_bound(bound, reply);

    info!(
        variant = %config.variant,
        fps = config.fps,
        frames = config.frames,
        interval_us = config.frame_interval().as_micros() as u64,
        "simulation started"
    );

    let timer = LoopTimer::for_current_thread()?;
    let origin = Instant::now();
    let producer = Rc::new_cyclic(|this| {
        RefCell::new(Producer {
            this: this.clone(),
            config: config.clone(),
            proxy,
            timer,
            tally: Arc::clone(&shared.tally),
            quit: main_loop.handle(),
            origin,
            next_index: 0,
        })
    });
    producer.borrow_mut().tick();

    let timed_out = Rc::new(Cell::new(false));
    let mut watchdog = LoopTimer::for_current_thread()?;
    {
        let timed_out = Rc::clone(&timed_out);
        let quit = main_loop.handle();
        watchdog.start(
            config.timeout(),
            Box::new(move || {
                timed_out.set(true);
                quit.quit();
            }),
        );
    }

    main_loop.run();
    watchdog.stop();
    let elapsed = origin.elapsed();

    let (stats_tx, stats_rx) = flume::bounded(1);
    producer
        .borrow()
        .proxy
        .with_scheduler(move |scheduler: &mut DisplayScheduler| {
            let _ = stats_tx.send(scheduler.stats());
        });
    drop(producer);
    display_handle.quit();
    if display_thread.join().is_err() {
        return Err(Error::Simulation("display thread panicked".to_string()));
    }
    let scheduler = stats_rx.try_recv().ok();

    let observed = *shared.tally.lock();
    if timed_out.get() {
        warn!(
            completed = observed.completed(),
            frames = config.frames,
            "simulation timed out"
        );
        return Err(Error::Simulation(format!(
            "timed out after {}ms with {} of {} frames completed",
            config.timeout_ms,
            observed.completed(),
            config.frames
        )));
    }

    let report = SimulationReport {
        variant: config.variant,
        fps: config.fps,
        frames: config.frames,
        displayed: observed.displayed,
        dropped: observed.dropped,
        stalls: shared.stalls.load(Ordering::Relaxed),
        elapsed_ms: elapsed.as_millis() as u64,
        max_display_lateness_us: observed.max_display_lateness_us,
        drop_ratio: observed.drop_ratio(),
        scheduler,
    };
    info!(
        displayed = report.displayed,
        dropped = report.dropped,
        elapsed_ms = report.elapsed_ms,
        "simulation finished"
    );
    Ok(report)
}
