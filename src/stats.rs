//! Per-call timing for the filter entry points.
//!
//! Stats are owned by the caller and passed into every call, so two
//! sessions running side by side never share counters.

use std::time::Duration;

/// Number of recent call durations kept.
pub const HISTORY_LEN: usize = 16;

const LATENCY_ALPHA: f64 = 0.1;

#[derive(Clone, Debug, Default)]
pub struct FilterStats {
    history_us: [u64; HISTORY_LEN],
    next: usize,
    recorded: usize,
    calls: u64,
    failures: u64,
    latency_avg_us: f64,
}

impl FilterStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call that took `elapsed`.
    pub fn record(&mut self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.history_us[self.next] = micros;
        self.next = (self.next + 1) % HISTORY_LEN;
        self.recorded = (self.recorded + 1).min(HISTORY_LEN);
        self.calls += 1;
        // The first successful sample seeds the average.
        self.latency_avg_us = if self.calls - self.failures == 1 {
            micros as f64
        } else {
            LATENCY_ALPHA * micros as f64 + (1.0 - LATENCY_ALPHA) * self.latency_avg_us
        };
    }

    pub fn record_failure(&mut self) {
        self.calls += 1;
        self.failures += 1;
    }

    /// Duration of the most recent successful call.
    pub fn last(&self) -> Option<Duration> {
        if self.recorded == 0 {
            return None;
        }
        let index = (self.next + HISTORY_LEN - 1) % HISTORY_LEN;
        Some(Duration::from_micros(self.history_us[index]))
    }

    /// Fastest call among the retained history.
    pub fn minimum(&self) -> Option<Duration> {
        self.retained().min().map(Duration::from_micros)
    }

    fn retained(&self) -> impl Iterator<Item = u64> + '_ {
        let start = (self.next + HISTORY_LEN - self.recorded) % HISTORY_LEN;
        (0..self.recorded).map(move |i| self.history_us[(start + i) % HISTORY_LEN])
    }

    pub fn snapshot(&self) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            calls: self.calls,
            failures: self.failures,
            last: self.last().unwrap_or_default(),
            minimum: self.minimum().unwrap_or_default(),
            latency_avg: Duration::from_micros(self.latency_avg_us as u64),
            history: self.retained().map(Duration::from_micros).collect(),
        }
    }
}

/// A point-in-time copy of filter statistics.
#[derive(Clone, Debug, Default)]
pub struct FilterStatsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub last: Duration,
    pub minimum: Duration,
    /// Exponentially-weighted moving average of successful call latency.
    pub latency_avg: Duration,
    /// Oldest first.
    pub history: Vec<Duration>,
}
