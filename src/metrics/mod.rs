// src/metrics/mod.rs

//! Aggregate counters and the operator log derived from the dispatch engine.

pub mod log;

pub use log::{LogEntry, LogLevel, SystemLog};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Aggregate view published to reporting callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub queue_length: usize,
    /// Percentage of completed deliveries that were sent; 100 when none completed
    pub success_rate: f64,
    /// Mean over the retained response time samples, in milliseconds
    pub average_response_time: f64,
    /// Submissions accepted within the throughput window
    pub requests_this_minute: u64,
    pub computed_at: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            total_sent: 0,
            total_failed: 0,
            queue_length: 0,
            success_rate: 100.0,
            average_response_time: 0.0,
            requests_this_minute: 0,
            computed_at: Utc::now(),
        }
    }
}

/// Raw counters the snapshot is recomputed from
#[derive(Debug)]
pub struct MetricsCollector {
    total_sent: u64,
    total_failed: u64,
    response_times: VecDeque<Duration>,
    max_samples: usize,
    accepted: VecDeque<Instant>,
    window: Duration,
    snapshot: MetricsSnapshot,
}

impl MetricsCollector {
    pub fn new(max_samples: usize, window: Duration) -> Self {
        Self {
            total_sent: 0,
            total_failed: 0,
            response_times: VecDeque::with_capacity(max_samples.min(1024)),
            max_samples,
            accepted: VecDeque::new(),
            window,
            snapshot: MetricsSnapshot::default(),
        }
    }

    /// A new (non-duplicate) submission was accepted
    pub fn record_accepted(&mut self) {
        self.accepted.push_back(Instant::now());
    }

    pub fn record_sent(&mut self, response_time: Duration) {
        self.total_sent += 1;
        if self.response_times.len() == self.max_samples {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time);
    }

    pub fn record_failed(&mut self) {
        self.total_failed += 1;
    }

    /// Rebuild the published snapshot from the counters
    pub fn recompute(&mut self, queue_length: usize) -> &MetricsSnapshot {
        let now = Instant::now();
        while let Some(front) = self.accepted.front() {
            if now.duration_since(*front) > self.window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }

        let completed = self.total_sent + self.total_failed;
        let success_rate = if completed == 0 {
            100.0
        } else {
            self.total_sent as f64 / completed as f64 * 100.0
        };

        let average_response_time = if self.response_times.is_empty() {
            0.0
        } else {
            let total_ms: f64 = self
                .response_times
                .iter()
                .map(|d| d.as_secs_f64() * 1000.0)
                .sum();
            total_ms / self.response_times.len() as f64
        };

        self.snapshot = MetricsSnapshot {
            total_sent: self.total_sent,
            total_failed: self.total_failed,
            queue_length,
            success_rate,
            average_response_time,
            requests_this_minute: self.accepted.len() as u64,
            computed_at: Utc::now(),
        };
        &self.snapshot
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[test]
    fn test_empty_collector_reports_full_success() {
        let mut collector = MetricsCollector::new(10, Duration::from_secs(60));
        let snapshot = collector.recompute(0);

        assert_eq!(snapshot.success_rate, 100.0);
        assert_eq!(snapshot.average_response_time, 0.0);
        assert_eq!(snapshot.total_sent + snapshot.total_failed, 0);
    }

    #[test]
    fn test_success_rate_and_mean() {
        let mut collector = MetricsCollector::new(10, Duration::from_secs(60));
        collector.record_sent(Duration::from_millis(100));
        collector.record_sent(Duration::from_millis(300));
        collector.record_sent(Duration::from_millis(200));
        collector.record_failed();

        let snapshot = collector.recompute(4);
        assert_eq!(snapshot.total_sent, 3);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.queue_length, 4);
        assert_eq!(snapshot.success_rate, 75.0);
        assert!((snapshot.average_response_time - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_response_history_is_bounded() {
        let mut collector = MetricsCollector::new(2, Duration::from_secs(60));
        collector.record_sent(Duration::from_millis(1000));
        collector.record_sent(Duration::from_millis(10));
        collector.record_sent(Duration::from_millis(30));

        // Oldest sample evicted; counter still counts all three
        let snapshot = collector.recompute(0);
        assert_eq!(snapshot.total_sent, 3);
        assert!((snapshot.average_response_time - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_only_changes_on_recompute() {
        let mut collector = MetricsCollector::new(10, Duration::from_secs(60));
        collector.record_failed();
        assert_eq!(collector.snapshot().total_failed, 0);

        collector.recompute(0);
        assert_eq!(collector.snapshot().total_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_window_slides() {
        let mut collector = MetricsCollector::new(10, Duration::from_secs(60));
        collector.record_accepted();
        collector.record_accepted();

        time::sleep(Duration::from_secs(30)).await;
        collector.record_accepted();
        assert_eq!(collector.recompute(0).requests_this_minute, 3);

        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(collector.recompute(0).requests_this_minute, 1);
    }
}
