use std::collections::VecDeque;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Streaming configuration: level-tick staggering plus per-level, per-tick
/// budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Level `L` issues load requests and evictions on ticks where
    /// `(tick + L) % level_tick_interval == 0`. 0 and 1 mean every tick.
    pub level_tick_interval: u32,
    /// Maximum create requests one level queues per tick.
    pub create_budget: Option<usize>,
    /// Maximum unload requests one level queues per tick.
    pub unload_budget: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            level_tick_interval: 1,
            create_budget: None,
            unload_budget: None,
        }
    }
}

impl StreamConfig {
    /// Whether `level` runs its streaming step on `tick`.
    pub fn level_due(&self, tick: u64, level: u8) -> bool {
        let interval = u64::from(self.level_tick_interval);
        interval <= 1 || (tick + u64::from(level)) % interval == 0
    }
}

/// Per-tick streaming counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Resident nodes stamped by keep-alive.
    pub touched: usize,
    /// Create requests queued.
    pub requested: usize,
    /// Nodes queued for unload.
    pub evicted: usize,
}

impl Add for StreamStats {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            touched: self.touched + rhs.touched,
            requested: self.requested + rhs.requested,
            evicted: self.evicted + rhs.evicted,
        }
    }
}

impl AddAssign for StreamStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Rolling window of tick durations.
#[derive(Debug, Clone)]
pub struct TickTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one sample, dropping the oldest once the window is full.
    pub fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(dt);
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn average(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        self.window.iter().sum::<Duration>() / self.window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or_default()
    }

    pub fn last(&self) -> Option<Duration> {
        self.window.back().copied()
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.level_tick_interval, 1);
        assert_eq!(config.create_budget, None);
        assert_eq!(config.unload_budget, None);
    }

    #[test]
    fn levels_are_staggered() {
        let config = StreamConfig {
            level_tick_interval: 3,
            ..Default::default()
        };
        let due: Vec<u8> = (0..6).filter(|&l| config.level_due(4, l)).collect();
        assert_eq!(due, vec![2, 5]);
        let every = StreamConfig::default();
        assert!((0..8).all(|l| every.level_due(7, l)));
    }

    #[test]
    fn stats_accumulate() {
        let mut total = StreamStats::default();
        total += StreamStats {
            touched: 2,
            requested: 1,
            evicted: 0,
        };
        total += StreamStats {
            touched: 1,
            requested: 0,
            evicted: 4,
        };
        assert_eq!(
            total,
            StreamStats {
                touched: 3,
                requested: 1,
                evicted: 4
            }
        );
    }

    #[test]
    fn tick_timer_tracks_history() {
        let mut timer = TickTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn tick_timer_drops_oldest() {
        let mut timer = TickTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
        assert_eq!(timer.last(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn empty_timer_reports_zero() {
        let timer = TickTimer::default();
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
        assert!(timer.last().is_none());
    }
}
