//! # Frame Statistics
//!
//! Per-frame timings from [`FrameLoop`](crate::FrameLoop) and a running
//! summary over many frames.

use std::time::Duration;

/// Timings of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Dispatch to end of cycle, in microseconds.
    pub total_us: u64,
    /// Application task on stage 0, in microseconds.
    pub app_us: u64,
    /// Slowest stage worker, in microseconds.
    pub stages_us: u64,
    /// `Pipeline::cycle()`, in microseconds.
    pub cycle_us: u64,
    /// Cyclers waiting to be cycled at the frame boundary.
    pub dirty_cyclers: usize,
}

impl FrameStats {
    /// Total frame time in milliseconds.
    #[inline]
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_us as f64 / 1000.0
    }

    /// True when the frame took longer than `budget`.
    #[must_use]
    pub fn is_over_budget(&self, budget: Duration) -> bool {
        u128::from(self.total_us) > budget.as_micros()
    }
}

/// Running summary of [`FrameStats`].
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    budget: Option<Duration>,
    frames_recorded: u64,
    total_us_sum: u64,
    app_us_sum: u64,
    stages_us_sum: u64,
    cycle_us_sum: u64,
    dirty_sum: u64,
    min_frame_us: u64,
    max_frame_us: u64,
    frames_over_budget: u64,
}

impl FrameStatsAccumulator {
    /// Creates an empty accumulator. Frames longer than `budget` count as
    /// over budget; `None` never does.
    #[must_use]
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            budget,
            frames_recorded: 0,
            total_us_sum: 0,
            app_us_sum: 0,
            stages_us_sum: 0,
            cycle_us_sum: 0,
            dirty_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            frames_over_budget: 0,
        }
    }

    /// Records one frame.
    pub fn record(&mut self, stats: &FrameStats) {
        self.frames_recorded += 1;
        self.total_us_sum += stats.total_us;
        self.app_us_sum += stats.app_us;
        self.stages_us_sum += stats.stages_us;
        self.cycle_us_sum += stats.cycle_us;
        self.dirty_sum += stats.dirty_cyclers as u64;
        self.min_frame_us = self.min_frame_us.min(stats.total_us);
        self.max_frame_us = self.max_frame_us.max(stats.total_us);

        if self.budget.is_some_and(|budget| stats.is_over_budget(budget)) {
            self.frames_over_budget += 1;
        }
    }

    /// Frames recorded so far.
    #[inline]
    #[must_use]
    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded
    }

    /// Frames that ran over budget.
    #[inline]
    #[must_use]
    pub fn frames_over_budget(&self) -> u64 {
        self.frames_over_budget
    }

    fn average(&self, sum: u64) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        sum as f64 / self.frames_recorded as f64
    }

    /// Average frame time in milliseconds.
    #[must_use]
    pub fn avg_frame_ms(&self) -> f64 {
        self.average(self.total_us_sum) / 1000.0
    }

    /// Average frames per second.
    #[must_use]
    pub fn avg_fps(&self) -> f64 {
        let avg_ms = self.avg_frame_ms();
        if avg_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / avg_ms
    }

    /// Average cycle time in microseconds.
    #[must_use]
    pub fn avg_cycle_us(&self) -> f64 {
        self.average(self.cycle_us_sum)
    }

    /// Average number of dirty cyclers per frame boundary.
    #[must_use]
    pub fn avg_dirty_cyclers(&self) -> f64 {
        self.average(self.dirty_sum)
    }

    /// Fraction of frames over budget.
    #[must_use]
    pub fn over_budget_ratio(&self) -> f64 {
        self.average(self.frames_over_budget)
    }

    /// Logs the summary at `info` level.
    pub fn log_summary(&self) {
        if self.frames_recorded == 0 {
            tracing::info!("no frames recorded");
            return;
        }
        tracing::info!(
            frames = self.frames_recorded,
            avg_frame_ms = format_args!("{:.3}", self.avg_frame_ms()),
            avg_fps = format_args!("{:.1}", self.avg_fps()),
            min_frame_ms = format_args!("{:.3}", self.min_frame_us as f64 / 1000.0),
            max_frame_ms = format_args!("{:.3}", self.max_frame_us as f64 / 1000.0),
            "frame timing"
        );
        tracing::info!(
            app_ms = format_args!("{:.3}", self.average(self.app_us_sum) / 1000.0),
            stages_ms = format_args!("{:.3}", self.average(self.stages_us_sum) / 1000.0),
            cycle_us = format_args!("{:.1}", self.avg_cycle_us()),
            dirty_cyclers = format_args!("{:.1}", self.avg_dirty_cyclers()),
            "frame breakdown"
        );
        if let Some(budget) = self.budget {
            tracing::info!(
                budget_ms = format_args!("{:.3}", budget.as_secs_f64() * 1000.0),
                over_budget = self.frames_over_budget,
                over_budget_pct = format_args!("{:.1}", self.over_budget_ratio() * 100.0),
                "frame budget"
            );
        }
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new(None)
    }
}
