//! Bucketed rolling window of call outcomes.
//!
//! Samples land in the bucket covering "now"; buckets older than the window are
//! discarded lazily on every record or read.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub successes: u64,
    pub failures: u64,
}

impl WindowStats {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Error rate in percent, 0.0 when the window is empty
    pub fn error_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.failures as f64 * 100.0 / total as f64
    }
}

#[derive(Debug)]
struct Bucket {
    index: u64,
    stats: WindowStats,
}

#[derive(Debug)]
pub struct RollingWindow {
    origin: Instant,
    bucket_width: Duration,
    bucket_count: u64,
    buckets: Mutex<VecDeque<Bucket>>,
}

impl RollingWindow {
    pub fn new(window: Duration, bucket_count: u32) -> Self {
        let bucket_count = bucket_count.max(1);
        let bucket_width = (window / bucket_count).max(Duration::from_millis(1));
        Self {
            origin: Instant::now(),
            bucket_width,
            bucket_count: bucket_count as u64,
            buckets: Mutex::new(VecDeque::with_capacity(bucket_count as usize)),
        }
    }

    pub fn record_success(&self) {
        self.record(|stats| stats.successes += 1);
    }

    pub fn record_failure(&self) {
        self.record(|stats| stats.failures += 1);
    }

    /// Aggregate of every bucket still inside the window
    pub fn stats(&self) -> WindowStats {
        let current = self.current_index();
        let mut buckets = self.buckets.lock();
        Self::evict(&mut buckets, current, self.bucket_count);
        buckets.iter().fold(WindowStats::default(), |acc, bucket| WindowStats {
            successes: acc.successes + bucket.stats.successes,
            failures: acc.failures + bucket.stats.failures,
        })
    }

    pub fn reset(&self) {
        self.buckets.lock().clear();
    }

    fn record(&self, apply: impl FnOnce(&mut WindowStats)) {
        let current = self.current_index();
        let mut buckets = self.buckets.lock();
        Self::evict(&mut buckets, current, self.bucket_count);

        match buckets.back_mut() {
            Some(bucket) if bucket.index == current => apply(&mut bucket.stats),
            _ => {
                let mut stats = WindowStats::default();
                apply(&mut stats);
                buckets.push_back(Bucket {
                    index: current,
                    stats,
                });
            }
        }
    }

    fn current_index(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos()) as u64
    }

    fn evict(buckets: &mut VecDeque<Bucket>, current: u64, bucket_count: u64) {
        while let Some(front) = buckets.front() {
            if front.index + bucket_count <= current {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }
}
