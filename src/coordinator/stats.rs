use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the coordinator tasks
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    windows_opened: AtomicU64,
    requests_coalesced: AtomicU64,
    stop_preemptions: AtomicU64,
    requests_merged: AtomicU64,
    dispatches: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of the coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatsSnapshot {
    pub triggers_submitted: u64,
    pub triggers_dropped: u64,
    pub windows_opened: u64,
    pub requests_coalesced: u64,
    pub stop_preemptions: u64,
    pub requests_merged: u64,
    pub dispatches: u64,
    pub skipped: u64,
    pub failures: u64,
    pub retries: u64,
}

impl CoordinatorStats {
    pub fn record_window_opened(&self) {
        self.windows_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_coalesced(&self) {
        self.requests_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop_preemption(&self) {
        self.stop_preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_merged(&self) {
        self.requests_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters. Channel counters are owned by the channel
    /// and passed in.
    pub fn snapshot(&self, triggers_submitted: u64, triggers_dropped: u64) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            triggers_submitted,
            triggers_dropped,
            windows_opened: self.windows_opened.load(Ordering::Relaxed),
            requests_coalesced: self.requests_coalesced.load(Ordering::Relaxed),
            stop_preemptions: self.stop_preemptions.load(Ordering::Relaxed),
            requests_merged: self.requests_merged.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl CoordinatorStatsSnapshot {
    /// Share of submitted triggers that were lost to overflow
    pub fn drop_rate(&self) -> f64 {
        if self.triggers_submitted == 0 {
            0.0
        } else {
            self.triggers_dropped as f64 / self.triggers_submitted as f64
        }
    }

    /// Triggers absorbed per dispatched request
    pub fn coalescing_ratio(&self) -> f64 {
        let requests = self.requests_coalesced + self.stop_preemptions;
        if requests == 0 {
            0.0
        } else {
            self.triggers_submitted.saturating_sub(self.triggers_dropped) as f64 / requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CoordinatorStats::default();
        stats.record_window_opened();
        stats.record_request_coalesced();
        stats.record_dispatch();
        stats.record_retry();
        stats.record_retry();

        let snapshot = stats.snapshot(10, 2);
        assert_eq!(snapshot.windows_opened, 1);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.failures, 0);
        assert!((snapshot.drop_rate() - 0.2).abs() < f64::EPSILON);
        assert!((snapshot.coalescing_ratio() - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_ratios() {
        let snapshot = CoordinatorStats::default().snapshot(0, 0);
        assert_eq!(snapshot.drop_rate(), 0.0);
        assert_eq!(snapshot.coalescing_ratio(), 0.0);
    }
}
