//! Statistics tracking for the DNS proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::race::SelectionKind;

/// Atomic counters, reset on every snapshot.
pub struct Stats {
    pub requests: AtomicU64,
    pub answered: AtomicU64,
    pub low_priority: AtomicU64,
    pub nxdomain: AtomicU64,
    pub dropped: AtomicU64,
    pub upstream_failures: AtomicU64,
    /// Cumulative response time of answered queries, in microseconds.
    total_response_time_us: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            answered: AtomicU64::new(0),
            low_priority: AtomicU64::new(0),
            nxdomain: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_answered(&self, kind: SelectionKind, response_time: Duration) {
        self.answered.fetch_add(1, Ordering::Relaxed);
        match kind {
            SelectionKind::Primary => {}
            SelectionKind::LowPriority => {
                self.low_priority.fetch_add(1, Ordering::Relaxed);
            }
            SelectionKind::NxDomain => {
                self.nxdomain.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_response_time_us
            .fetch_add(response_time.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let answered = self.answered.swap(0, Ordering::Relaxed);
        let low_priority = self.low_priority.swap(0, Ordering::Relaxed);
        let nxdomain = self.nxdomain.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let upstream_failures = self.upstream_failures.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
            answered,
            low_priority,
            nxdomain,
            dropped,
            upstream_failures,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub answered: u64,
    pub low_priority: u64,
    pub nxdomain: u64,
    pub dropped: u64,
    pub upstream_failures: u64,
    pub avg_response_ms: f64,
}
