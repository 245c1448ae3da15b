use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters, updated lock-free from concurrent calls
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

impl PipelineMetrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, count: u32) {
        self.retries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, succeeded: bool) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = PipelineMetrics::default();
        metrics.record_request();
        metrics.record_request();
        metrics.record_success();
        metrics.record_error();
        metrics.record_retries(2);
        metrics.record_refresh(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.refreshes, 1);
        assert_eq!(snap.refresh_failures, 1);
    }
}
