//! # Tick Pacing
//!
//! Sessions never read wall time themselves. Hosts that want real-time
//! pacing wrap their tick calls in a [`TickLoop`]:
//!
//! ```text
//! while running {
//!     if !pacer.should_tick() { pacer.wait_for_next_tick(); continue; }
//!     let began = pacer.begin_tick();
//!     server.tick(&mut world)?;
//!     pacer.end_tick(began);
//! }
//! ```
//!
//! Tests and the soak bin in batch mode skip `should_tick` and step as fast
//! as they like; the stats still measure the work per tick.

use std::time::{Duration, Instant};

/// Work-time measurements over every tick ended so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks measured.
    pub total_ticks: u64,
    /// Exponential average (1/16 weight per sample), microseconds.
    pub avg_tick_us: u64,
    /// Slowest tick, microseconds.
    pub max_tick_us: u64,
    /// Ticks whose work took longer than one period.
    pub late_ticks: u64,
}

impl TickStats {
    fn record(&mut self, work: Duration, period: Duration) {
        let us = u64::try_from(work.as_micros()).unwrap_or(u64::MAX);
        self.avg_tick_us = if self.total_ticks == 0 {
            us
        } else {
            self.avg_tick_us - self.avg_tick_us / 16 + us / 16
        };
        self.max_tick_us = self.max_tick_us.max(us);
        self.late_ticks += u64::from(work > period);
        self.total_ticks += 1;
    }
}

/// Fixed-rate tick accumulator.
#[derive(Debug)]
pub struct TickLoop {
    period: Duration,
    last_poll: Instant,
    owed: Duration,
    started: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Paces `tick_rate` ticks per second.
    ///
    /// # Panics
    ///
    /// Panics if `tick_rate` is zero.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");
        Self {
            period: Duration::from_secs(1) / tick_rate,
            last_poll: Instant::now(),
            owed: Duration::ZERO,
            started: 0,
            stats: TickStats::default(),
        }
    }

    /// Banks the time since the last poll and reports whether a whole
    /// period is owed.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.owed += now - self.last_poll;
        self.last_poll = now;
        self.owed >= self.period
    }

    /// Pays one period off the balance and stamps the tick start.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.owed = self.owed.saturating_sub(self.period);
        self.started += 1;
        Instant::now()
    }

    /// Records the work time of the tick begun at `began`.
    pub fn end_tick(&mut self, began: Instant) {
        self.stats.record(began.elapsed(), self.period);
    }

    /// Sleeps out whatever is left of the current period.
    pub fn wait_for_next_tick(&self) {
        let due = self.period.saturating_sub(self.owed);
        let waited = self.last_poll.elapsed();
        if due > waited {
            std::thread::sleep(due - waited);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.started
    }

    /// Measurements so far.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Length of one tick.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_rate() {
        assert_eq!(TickLoop::new(50).period(), Duration::from_millis(20));
        assert_eq!(TickLoop::new(1).period(), Duration::from_secs(1));
    }

    #[test]
    fn test_nothing_owed_right_after_creation() {
        let mut pacer = TickLoop::new(1);
        assert!(!pacer.should_tick());
        assert_eq!(pacer.tick_count(), 0);
    }

    #[test]
    fn test_wait_makes_a_tick_due() {
        let mut pacer = TickLoop::new(200);
        assert!(!pacer.should_tick());
        pacer.wait_for_next_tick();
        assert!(pacer.should_tick());

        let began = pacer.begin_tick();
        pacer.end_tick(began);
        assert_eq!(pacer.tick_count(), 1);
        assert_eq!(pacer.stats().total_ticks, 1);
    }

    #[test]
    fn test_slow_tick_counts_as_late() {
        let mut stats = TickStats::default();
        let period = Duration::from_millis(10);
        stats.record(Duration::from_millis(2), period);
        stats.record(Duration::from_millis(12), period);

        assert_eq!(stats.total_ticks, 2);
        assert_eq!(stats.late_ticks, 1);
        assert_eq!(stats.max_tick_us, 12_000);
        assert_eq!(stats.avg_tick_us, 2_000 - 125 + 750);
    }
}
