//! Clock capability.
//!
//! The scheduler never calls `Instant::now()` directly; it asks a [`Clock`].
//! Production code uses [`SystemClock`], tests use [`ManualClock`] and move
//! time forward explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Monotonic system clock, optionally shifted by a fixed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemClock {
    offset: Duration,
}

impl SystemClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offset: Duration::ZERO,
        }
    }

    /// A clock that reports `Instant::now() + offset`.
    #[must_use]
    pub const fn with_offset(offset: Duration) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> Duration {
        self.offset
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now() + self.offset
    }
}

/// Virtual clock that only moves when told to.
///
/// Clones share the same timeline, so a test can keep one handle while the
/// scheduler under test owns another. Time never goes backwards.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed_nanos: Arc<AtomicU64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The instant this clock started at.
    #[must_use]
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// The instant `offset` after the origin. Handy for building deadlines.
    #[must_use]
    pub fn at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }

    /// Time elapsed since the origin.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Acquire))
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = saturating_nanos(by);
        let _ = self
            .elapsed_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |nanos| {
                Some(nanos.saturating_add(by))
            });
    }

    /// Move time forward to `elapsed` past the origin. Earlier values are ignored.
    pub fn advance_to(&self, elapsed: Duration) {
        self.elapsed_nanos
            .fetch_max(saturating_nanos(elapsed), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
