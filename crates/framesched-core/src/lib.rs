//! framesched-core: deadline-based video frame display scheduling
//!
//! Producers hand frames to a [`FrameScheduler`] together with the instant
//! each frame should appear. The scheduler shows the right frame when its
//! time comes, reports every frame exactly once as displayed or dropped, and
//! never calls back into the producer from inside `schedule`.
//!
//! # Architecture
//!
//! ```text
//! producer context                       scheduler context
//!   SchedulerProxy ── post(schedule) ──►  DeadlineScheduler
//!        ▲                                  │  timer fires
//!        └──────── post(on_done) ◄──────────┘  display sink
//! ```
//!
//! # Modules
//!
//! - `scheduler`: the shared contract (`FrameScheduler`, `FrameOutcome`)
//! - `deadline`: priority queue plus one-shot timer; the scheduler core
//! - `clockless`: displays on schedule, ignores deadlines
//! - `proxy`: drives a scheduler living on another execution context
//! - `fake`: manually completed test double
//! - `clock`, `timer`: time capabilities with manual test implementations
//! - `context`, `run_loop`, `bound`: execution contexts and objects bound to them
//! - `stats`: counters
//! - `config`, `logging`, `error`: ambient plumbing
//! - `simulation`: the producer/display run behind `framesched simulate`
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod bound;
pub mod clock;
pub mod clockless;
pub mod config;
pub mod context;
pub mod deadline;
pub mod error;
pub mod fake;
pub mod logging;
pub mod proxy;
pub mod run_loop;
pub mod scheduler;
pub mod simulation;
pub mod stats;
pub mod timer;

pub use error::{ConfigError, ContextError, Error, Result};
pub use scheduler::{DisplaySink, DoneCallback, FrameOutcome, FrameScheduler};
