//! Worker Pool (§4.2) and the process-wide Pool Registry (§9 design note, R1):
//! a bounded tokio mpsc queue feeding a fixed number of worker tasks, each
//! executing leaf algorithms via `spawn_blocking`, grounded on
//! `internal/workers/pool.go`'s `WorkerPool`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

use crate::jobs::algorithms::run_algorithm;
use crate::jobs::cancel::CancelToken;
use crate::jobs::job::{JobId, ResponseArtifact};
use crate::jobs::metrics::PoolMetrics;
use crate::jobs::JobError;

/// One unit of work handed to a pool: the job id, command, params, a cancel
/// token shared with the supervisor, and the channel the pool replies on.
struct WorkItem {
    job_id: JobId,
    command: String,
    params: HashMap<String, String>,
    cancel: CancelToken,
    reply: oneshot::Sender<ResponseArtifact>,
}

/// A point-in-time snapshot for `/status` (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolInfo {
    pub name: String,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_len: usize,
    pub busy: usize,
    pub total_processed: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
}

/// A fixed-size pool of workers processing a single command's queue.
pub struct WorkerPool {
    name: String,
    sender: mpsc::Sender<WorkItem>,
    queue_depth: usize,
    workers: usize,
    busy: Arc<AtomicUsize>,
    metrics: Arc<PoolMetrics>,
}

impl WorkerPool {
    /// Spawns `workers` tasks draining a bounded channel of capacity
    /// `queue_depth`. Matches the Go original's `InitPool(name, workers, queueDepth)`.
    pub fn new(name: impl Into<String>, workers: usize, queue_depth: usize) -> Arc<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<WorkItem>(queue_depth.max(1));
        let busy = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(PoolMetrics::new(1000));

        let pool = Arc::new(Self {
            name: name.clone(),
            sender: tx,
            queue_depth,
            workers,
            busy: busy.clone(),
            metrics: metrics.clone(),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers {
            let rx = rx.clone();
            let busy = busy.clone();
            let metrics = metrics.clone();
            let pool_name = name.clone();
            tokio::spawn(async move {
                info!(pool = %pool_name, worker_id, "worker started");
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(item) = item else {
                        info!(pool = %pool_name, worker_id, "worker shutting down: pool closed");
                        break;
                    };
                    busy.fetch_add(1, Ordering::AcqRel);
                    let start = Instant::now();
                    let command = item.command.clone();
                    let params = item.params.clone();
                    let cancel = item.cancel.clone();
                    let artifact = tokio::task::spawn_blocking(move || {
                        run_algorithm(&command, &params, &cancel)
                    })
                    .await
                    .unwrap_or_else(|join_err| {
                        warn!(error = %join_err, "worker task panicked");
                        ResponseArtifact::json(
                            500,
                            "Internal Server Error",
                            &serde_json::json!({ "error": "worker panicked" }),
                        )
                    });
                    let artifact = artifact.with_header("X-Worker-Id", worker_id.to_string());
                    metrics.record(start.elapsed()).await;
                    busy.fetch_sub(1, Ordering::AcqRel);
                    // Receiver may already be gone if the supervisor timed the job out (B4).
                    let _ = item.reply.send(artifact);
                }
            });
        }

        pool
    }

    /// Non-blocking enqueue (§4.4): `try_send` either accepts the job
    /// immediately or fails with `QueueFull` — this pool never blocks a caller.
    pub fn try_enqueue(
        &self,
        job_id: JobId,
        command: impl Into<String>,
        params: HashMap<String, String>,
        cancel: CancelToken,
    ) -> Result<oneshot::Receiver<ResponseArtifact>, JobError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let item = WorkItem {
            job_id,
            command: command.into(),
            params,
            cancel,
            reply: reply_tx,
        };
        self.sender
            .try_send(item)
            .map(|_| reply_rx)
            .map_err(|_| JobError::QueueFull)
    }

    /// Current queue occupancy, derived from channel capacity rather than a
    /// separate counter (idiomatic substitute for Go's `len(chan)`).
    pub fn queue_len(&self) -> usize {
        self.queue_depth.saturating_sub(self.sender.capacity())
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn info(&self) -> PoolInfo {
        PoolInfo {
            name: self.name.clone(),
            workers: self.workers,
            queue_depth: self.queue_depth,
            queue_len: self.queue_len(),
            busy: self.busy(),
            total_processed: self.metrics.total_processed().await,
            avg_latency_ms: self.metrics.avg_latency_ms().await,
            p95_latency_ms: self.metrics.percentile(95.0).await,
        }
    }
}

/// Idempotent process-wide registry of named pools (R1: repeat `init_pool`
/// calls for the same name return the existing pool unchanged).
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<WorkerPool>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn init_pool(&self, name: &str, workers: usize, queue_depth: usize) -> Arc<WorkerPool> {
        if let Some(existing) = self.pools.read().await.get(name) {
            return existing.clone();
        }
        let mut guard = self.pools.write().await;
        // re-check: another caller may have raced us between the read and write lock
        if let Some(existing) = guard.get(name) {
            return existing.clone();
        }
        let pool = WorkerPool::new(name, workers, queue_depth);
        guard.insert(name.to_string(), pool.clone());
        pool
    }

    pub async fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.read().await.get(name).cloned()
    }

    pub async fn all_info(&self) -> Vec<PoolInfo> {
        let pools = self.pools.read().await;
        let mut infos = Vec::with_capacity(pools.len());
        for pool in pools.values() {
            infos.push(pool.info().await);
        }
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_runs_job_and_reports_metrics() {
        let pool = WorkerPool::new("fibonacci", 2, 4);
        let mut params = HashMap::new();
        params.insert("num".to_string(), "10".to_string());
        let rx = pool
            .try_enqueue("job-1".to_string(), "fibonacci", params, CancelToken::new())
            .unwrap();
        let artifact = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("did not time out")
            .expect("reply sent");
        assert_eq!(artifact.status_code, 200);
        let info = pool.info().await;
        assert_eq!(info.total_processed, 1);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_when_workers_busy() {
        let pool = WorkerPool::new("sleep", 1, 1);
        let mut params = HashMap::new();
        params.insert("seconds".to_string(), "1".to_string());
        // saturate the single worker, then fill the depth-1 queue
        let _rx1 = pool
            .try_enqueue("job-1".to_string(), "sleep", params.clone(), CancelToken::new())
            .unwrap();
        let _rx2 = pool
            .try_enqueue("job-2".to_string(), "sleep", params.clone(), CancelToken::new())
            .unwrap();
        let res = pool.try_enqueue("job-3".to_string(), "sleep", params, CancelToken::new());
        assert!(matches!(res, Err(JobError::QueueFull)));
    }

    #[tokio::test]
    async fn test_registry_is_idempotent() {
        let registry = PoolRegistry::new();
        let a = registry.init_pool("fibonacci", 2, 5).await;
        let b = registry.init_pool("fibonacci", 99, 99).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.workers, 2);
        assert_eq!(b.queue_depth, 5);
    }
}
