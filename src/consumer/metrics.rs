//! Consumer metrics collection

use crate::consumer::processor::AckDecision;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_DURATION_SAMPLES: usize = 1000;

/// Counters shared by the service and all of its claim handlers
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    /// Messages handed to the processor
    pub messages_consumed: Arc<AtomicU64>,
    /// Messages marked after a successful outcome
    pub messages_committed: Arc<AtomicU64>,
    /// Messages marked after a skip outcome
    pub messages_skipped: Arc<AtomicU64>,
    /// Messages left unmarked after a failure outcome
    pub messages_failed: Arc<AtomicU64>,
    /// Generations joined
    pub generations: Arc<AtomicU64>,
    /// Generations that ended with an error and were rejoined
    pub rejoins: Arc<AtomicU64>,
    /// Failed mark/commit calls
    pub commit_errors: Arc<AtomicU64>,
    processing_durations: Arc<RwLock<Vec<Duration>>>,
    start_time: Instant,
}

/// Point-in-time copy of [`ConsumerMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_consumed: u64,
    pub messages_committed: u64,
    pub messages_skipped: u64,
    pub messages_failed: u64,
    pub generations: u64,
    pub rejoins: u64,
    pub commit_errors: u64,
    pub avg_processing_ms: f64,
    pub uptime_secs: u64,
}

impl ConsumerMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            messages_consumed: Arc::new(AtomicU64::new(0)),
            messages_committed: Arc::new(AtomicU64::new(0)),
            messages_skipped: Arc::new(AtomicU64::new(0)),
            messages_failed: Arc::new(AtomicU64::new(0)),
            generations: Arc::new(AtomicU64::new(0)),
            rejoins: Arc::new(AtomicU64::new(0)),
            commit_errors: Arc::new(AtomicU64::new(0)),
            processing_durations: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_generations(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejoins(&self) {
        self.rejoins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_errors(&self) {
        self.commit_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one processor call
    pub fn record_decision(&self, decision: AckDecision, duration: Duration) {
        let counter = match decision {
            AckDecision::Commit => &self.messages_committed,
            AckDecision::CommitAndAbort => &self.messages_skipped,
            AckDecision::AbortWithoutCommit => &self.messages_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut durations = self.processing_durations.write();
        if durations.len() >= MAX_DURATION_SAMPLES {
            durations.remove(0);
        }
        durations.push(duration);
    }

    /// Average processor latency over the retained window
    pub fn avg_processing_time(&self) -> Duration {
        let durations = self.processing_durations.read();
        if durations.is_empty() {
            return Duration::ZERO;
        }
        durations.iter().sum::<Duration>() / durations.len() as u32
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_committed: self.messages_committed.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            rejoins: self.rejoins.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
            avg_processing_ms: self.avg_processing_time().as_secs_f64() * 1000.0,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decision_counts() {
        let metrics = ConsumerMetrics::new();
        metrics.increment_consumed();
        metrics.increment_consumed();
        metrics.record_decision(AckDecision::Commit, Duration::from_millis(2));
        metrics.record_decision(AckDecision::AbortWithoutCommit, Duration::from_millis(4));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_consumed, 2);
        assert_eq!(snapshot.messages_committed, 1);
        assert_eq!(snapshot.messages_failed, 1);
        assert_eq!(snapshot.messages_skipped, 0);
        assert!((snapshot.avg_processing_ms - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ConsumerMetrics::new();
        let clone = metrics.clone();
        clone.increment_generations();
        clone.increment_rejoins();

        assert_eq!(metrics.snapshot().generations, 1);
        assert_eq!(metrics.snapshot().rejoins, 1);
    }

    #[test]
    fn test_duration_window_is_bounded() {
        let metrics = ConsumerMetrics::new();
        for _ in 0..(MAX_DURATION_SAMPLES + 10) {
            metrics.record_decision(AckDecision::Commit, Duration::from_millis(1));
        }
        assert_eq!(metrics.processing_durations.read().len(), MAX_DURATION_SAMPLES);
    }
}
