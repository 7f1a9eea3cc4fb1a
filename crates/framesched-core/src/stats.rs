//! Scheduler counters.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::FrameOutcome;

/// Running totals for one scheduler, or for the outcomes a producer observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Frames accepted by `schedule`.
    pub scheduled: u64,
    /// Frames completed as displayed.
    pub displayed: u64,
    /// Frames completed as dropped.
    pub dropped: u64,
    /// Pending frames thrown away by `reset` without a completion.
    pub discarded_by_reset: u64,
    /// Worst lateness of a displayed frame, in microseconds.
    pub max_display_lateness_us: u64,
}

impl SchedulerStats {
    pub fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Displayed => self.displayed += 1,
            FrameOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn record_lateness(&mut self, lateness: Duration) {
        let micros = u64::try_from(lateness.as_micros()).unwrap_or(u64::MAX);
        self.max_display_lateness_us = self.max_display_lateness_us.max(micros);
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.displayed + self.dropped
    }

    /// Frames scheduled but neither completed nor discarded yet.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.completed() + self.discarded_by_reset)
    }

    /// Share of completed frames that were dropped, in `[0, 1]`.
    #[must_use]
    pub fn drop_ratio(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            0.0
        } else {
            self.dropped as f64 / completed as f64
        }
    }
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scheduled={} displayed={} dropped={} discarded={} max_lateness={:.3}ms",
            self.scheduled,
            self.displayed,
            self.dropped,
            self.discarded_by_reset,
            self.max_display_lateness_us as f64 / 1000.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_and_outstanding_add_up() {
        let mut stats = SchedulerStats {
            scheduled: 5,
            ..SchedulerStats::default()
        };
        stats.record(FrameOutcome::Displayed);
        stats.record(FrameOutcome::Dropped);
        stats.record(FrameOutcome::Dropped);
        stats.discarded_by_reset = 1;

        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.outstanding(), 1);
        assert!((stats.drop_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn drop_ratio_is_zero_before_any_completion() {
        assert_eq!(SchedulerStats::default().drop_ratio(), 0.0);
    }

    #[test]
    fn lateness_keeps_the_maximum() {
        let mut stats = SchedulerStats::default();
        stats.record_lateness(Duration::from_micros(1500));
        stats.record_lateness(Duration::from_micros(200));
        assert_eq!(stats.max_display_lateness_us, 1500);
        assert!(stats.to_string().contains("max_lateness=1.500ms"));
    }
}
