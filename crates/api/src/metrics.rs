use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Requests
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_request_time_us: AtomicU64,

    // Documents
    documents_processed: AtomicUsize,
    documents_failed: AtomicUsize,
    concepts_matched: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_request_time_us: AtomicU64::new(0),
            documents_processed: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            concepts_matched: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_request_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_documents(&self, processed: usize, failed: usize, concepts: usize) {
        self.documents_processed.fetch_add(processed, Ordering::Relaxed);
        self.documents_failed.fetch_add(failed, Ordering::Relaxed);
        self.concepts_matched.fetch_add(concepts, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_us = self.total_request_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_request_time_ms: if total_requests > 0 {
                total_us / total_requests as f64 / 1000.0
            } else {
                0.0
            },
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            concepts_matched: self.concepts_matched.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_request_time_ms: f64,
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub concepts_matched: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages_request_time() {
        let metrics = Metrics::new();
        metrics.record_request(true, Duration::from_millis(30));
        metrics.record_request(false, Duration::from_millis(10));
        metrics.record_documents(3, 1, 7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.avg_request_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.concepts_matched, 7);
    }
}
