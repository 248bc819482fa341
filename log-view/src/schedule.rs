//! Adaptive poll scheduling.
//!
//! A poll that yields entries refills a budget of fast ticks. While the budget lasts the
//! poller waits the short interval between polls; once spent it falls back to the long one.

use std::time::Duration;

pub const DEFAULT_SHORT_INTERVAL: Duration = Duration::from_millis(25);
pub const DEFAULT_LONG_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_FAST_TICKS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub short_interval: Duration,
    pub long_interval: Duration,
    pub fast_ticks: u32,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            short_interval: DEFAULT_SHORT_INTERVAL,
            long_interval: DEFAULT_LONG_INTERVAL,
            fast_ticks: DEFAULT_FAST_TICKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Fast,
    Idle,
}

#[derive(Debug, Clone)]
pub struct PollSchedule {
    options: ScheduleOptions,
    remaining_fast: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(ScheduleOptions::default())
    }
}

impl PollSchedule {
    /// Starts fast so the first batches after startup arrive quickly.
    pub fn new(options: ScheduleOptions) -> Self {
        Self {
            remaining_fast: options.fast_ticks,
            options,
        }
    }

    pub fn options(&self) -> &ScheduleOptions {
        &self.options
    }

    pub fn remaining_fast_ticks(&self) -> u32 {
        self.remaining_fast
    }

    pub fn pace(&self) -> Pace {
        if self.remaining_fast > 0 {
            Pace::Fast
        } else {
            Pace::Idle
        }
    }

    /// Record a settled poll. New entries refill the fast budget.
    pub fn record(&mut self, had_entries: bool) {
        if had_entries {
            self.remaining_fast = self.options.fast_ticks;
        }
    }

    /// Delay before the next poll; consumes one fast tick while any remain.
    pub fn next_delay(&mut self) -> Duration {
        if self.remaining_fast > 0 {
            self.remaining_fast -= 1;
            self.options.short_interval
        } else {
            self.options.long_interval
        }
    }

    /// Spend the fast budget, e.g. once no session is active.
    pub fn settle(&mut self) {
        self.remaining_fast = 0;
    }
}
