//! Pool Metrics (§4.1): running counters plus a bounded latency sample window,
//! grounded on `internal/metrics/metrics.go`'s `PoolMetrics`.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

struct Samples {
    total_processed: u64,
    total_latency_ms: u64,
    samples: VecDeque<u64>,
    max_samples: usize,
}

/// Per-pool metrics. All methods are mutually exclusive via a single lock
/// (§5: "Each Pool Metrics instance has its own lock").
pub struct PoolMetrics {
    inner: Mutex<Samples>,
}

impl PoolMetrics {
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Samples {
                total_processed: 0,
                total_latency_ms: 0,
                samples: VecDeque::with_capacity(max_samples),
                max_samples,
            }),
        }
    }

    /// Advances `total_processed`, adds the latency, and evicts the oldest
    /// sample once the window is full — FIFO eviction, not a true ring buffer,
    /// matching the Go original's `Samples = append(Samples[1:], ms)`.
    pub async fn record(&self, latency: Duration) {
        let mut s = self.inner.lock().await;
        s.total_processed += 1;
        let ms = latency.as_millis() as u64;
        s.total_latency_ms += ms;
        if s.samples.len() >= s.max_samples {
            s.samples.pop_front();
        }
        s.samples.push_back(ms);
    }

    pub async fn total_processed(&self) -> u64 {
        self.inner.lock().await.total_processed
    }

    pub async fn avg_latency_ms(&self) -> f64 {
        let s = self.inner.lock().await;
        if s.total_processed == 0 {
            0.0
        } else {
            s.total_latency_ms as f64 / s.total_processed as f64
        }
    }

    /// Nearest-rank percentile over a snapshot copy of the current samples
    /// (B3: empty window returns 0).
    pub async fn percentile(&self, p: f64) -> u64 {
        let mut copy: Vec<u64> = {
            let s = self.inner.lock().await;
            s.samples.iter().copied().collect()
        };
        if copy.is_empty() {
            return 0;
        }
        copy.sort_unstable();
        let n = copy.len();
        let idx = ((p / 100.0) * (n as f64 - 1.0) + 0.5) as usize;
        let idx = idx.min(n - 1);
        copy[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_percentile_is_zero() {
        let m = PoolMetrics::new(10);
        assert_eq!(m.percentile(95.0).await, 0);
        assert_eq!(m.avg_latency_ms().await, 0.0);
    }

    #[tokio::test]
    async fn test_record_and_percentile() {
        let m = PoolMetrics::new(1000);
        for ms in [10u64, 20, 30, 40, 50] {
            m.record(Duration::from_millis(ms)).await;
        }
        assert_eq!(m.total_processed().await, 5);
        assert_eq!(m.avg_latency_ms().await, 30.0);
        // nearest-rank p50 over [10,20,30,40,50]: idx = round(0.5*4)=2 -> 30
        assert_eq!(m.percentile(50.0).await, 30);
        // p95: idx = round(0.95*4)=round(3.8)=4 -> 50
        assert_eq!(m.percentile(95.0).await, 50);
    }

    #[tokio::test]
    async fn test_sample_window_eviction() {
        let m = PoolMetrics::new(2);
        m.record(Duration::from_millis(1)).await;
        m.record(Duration::from_millis(2)).await;
        m.record(Duration::from_millis(3)).await; // evicts the 1ms sample
        assert_eq!(m.total_processed().await, 3);
        // window now holds [2,3]; p100 (idx=1) -> 3
        assert_eq!(m.percentile(100.0).await, 3);
        assert_eq!(m.percentile(0.0).await, 2);
    }
}
