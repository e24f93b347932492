//! Job Manager (§4.3-§4.7): priority admission, a single dispatcher task,
//! and a per-job timeout supervisor. Grounded on `internal/jobs/manager.go`'s
//! overall shape (registry + priority channels + dispatcher loop), rebuilt
//! around tokio primitives in place of Go's native channels and goroutines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use crate::jobs::algorithms::run_algorithm;
use crate::jobs::cancel::CancelToken;
use crate::jobs::job::{Job, JobId, JobPriority, JobStatus, ResponseArtifact};
use crate::jobs::journal::Journal;
use crate::jobs::pool::PoolRegistry;
use crate::jobs::JobError;

const SUBMIT_AND_WAIT_BOUND: Duration = Duration::from_secs(30);
const DISPATCHER_IDLE_SLEEP: Duration = Duration::from_millis(50);
const POOL_FULL_REQUEUE_DELAY: Duration = Duration::from_millis(200);

#[derive(Clone)]
struct QueueItem {
    job_id: JobId,
    command: String,
    params: HashMap<String, String>,
}

/// Static configuration the manager needs at construction time.
pub struct JobManagerConfig {
    pub queue_depth: usize,
    pub max_total: usize,
    pub timeouts: HashMap<String, u64>,
    pub default_timeout_ms: u64,
}

struct Queues {
    high_tx: mpsc::Sender<QueueItem>,
    normal_tx: mpsc::Sender<QueueItem>,
    low_tx: mpsc::Sender<QueueItem>,
}

/// The three-level priority admission pipeline, the in-memory job registry,
/// and the journal, bound together behind one lock for all lifecycle
/// mutations (§5: "one registry-wide lock protects the Job map, the in-flight
/// channel maps, and the journal write").
pub struct JobManager {
    registry: Mutex<HashMap<JobId, Job>>,
    in_flight: Mutex<HashMap<JobId, CancelToken>>,
    queues: Queues,
    queue_depth: usize,
    max_total: usize,
    timeouts: HashMap<String, u64>,
    default_timeout_ms: u64,
    pools: Arc<PoolRegistry>,
    journal: Arc<Journal>,
}

impl JobManager {
    pub fn new(config: JobManagerConfig, pools: Arc<PoolRegistry>, journal: Arc<Journal>) -> Arc<Self> {
        let (high_tx, high_rx) = mpsc::channel(config.queue_depth.max(1));
        let (normal_tx, normal_rx) = mpsc::channel(config.queue_depth.max(1));
        let (low_tx, low_rx) = mpsc::channel(config.queue_depth.max(1));

        let manager = Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            queues: Queues { high_tx, normal_tx, low_tx },
            queue_depth: config.queue_depth,
            max_total: config.max_total,
            timeouts: config.timeouts,
            default_timeout_ms: config.default_timeout_ms,
            pools,
            journal,
        });

        let dispatcher = manager.clone();
        tokio::spawn(async move {
            dispatcher.run_dispatcher(high_rx, normal_rx, low_rx).await;
        });

        manager
    }

    /// Rebuilds the registry from the journal at startup (Q1 policy already
    /// applied inside `Journal::rehydrate`). Non-terminal jobs are not
    /// re-dispatched — they surface as `error` to callers that poll them.
    pub async fn rehydrate(&self) -> crate::Result<()> {
        let jobs = self.journal.rehydrate().await?;
        let count = jobs.len();
        *self.registry.lock().await = jobs;
        info!(count, "rehydrated job registry from journal");
        Ok(())
    }

    /// Snapshot of every initialized pool's metrics, for `/status`.
    pub async fn pool_snapshots(&self) -> Vec<crate::jobs::PoolInfo> {
        self.pools.all_info().await
    }

    fn timeout_for(&self, command: &str) -> u64 {
        self.timeouts.get(command).copied().unwrap_or(self.default_timeout_ms)
    }

    fn queue_len_unlocked(&self) -> usize {
        let used = |cap: usize| self.queue_depth.saturating_sub(cap);
        used(self.queues.high_tx.capacity()) + used(self.queues.normal_tx.capacity()) + used(self.queues.low_tx.capacity())
    }

    fn try_send(&self, priority: JobPriority, item: QueueItem) -> Result<(), QueueItem> {
        let sender = match priority {
            JobPriority::High => &self.queues.high_tx,
            JobPriority::Normal => &self.queues.normal_tx,
            JobPriority::Low => &self.queues.low_tx,
        };
        sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => item,
            mpsc::error::TrySendError::Closed(item) => item,
        })
    }

    /// Cross-priority fallback order for admission (§4.4) — distinct from the
    /// dispatcher's own coin-flip try-order in `run_dispatcher`.
    fn fallback_order(priority: JobPriority) -> [JobPriority; 3] {
        use JobPriority::*;
        match priority {
            High => [High, Normal, Low],
            Normal => [Normal, Low, High],
            Low => [Low, Normal, High],
        }
    }

    /// Submit (§4.4). Never blocks: admission is governed purely by
    /// non-blocking sends and the global cap check.
    pub async fn submit(
        &self,
        command: impl Into<String>,
        params: HashMap<String, String>,
        priority: JobPriority,
    ) -> Result<JobId, JobError> {
        let command = command.into();
        let mut registry = self.registry.lock().await;

        if self.queue_len_unlocked() >= self.max_total {
            return Err(JobError::QueueFull);
        }

        let timeout_ms = self.timeout_for(&command);
        let job = Job::new(command.clone(), params.clone(), priority, timeout_ms);
        let job_id = job.id.clone();
        registry.insert(job_id.clone(), job.clone());
        if let Err(e) = self.journal.append(&job).await {
            warn!(error = %e, job_id, "journal write failed, continuing with in-memory state only");
        }

        let item = QueueItem { job_id: job_id.clone(), command, params };
        let mut placed = false;
        let mut remaining = Some(item);
        for candidate in Self::fallback_order(priority) {
            let item = remaining.take().unwrap();
            match self.try_send(candidate, item) {
                Ok(()) => {
                    placed = true;
                    break;
                }
                Err(item) => remaining = Some(item),
            }
        }

        if !placed {
            registry.remove(&job_id);
            return Err(JobError::QueueFull);
        }

        Ok(job_id)
    }

    pub async fn get_meta(&self, job_id: &str) -> Result<Job, JobError> {
        self.registry
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// `/jobs/result` (§6): only a `done` job carries a usable result.
    pub async fn get_result(&self, job_id: &str) -> Result<ResponseArtifact, JobError> {
        let job = self.get_meta(job_id).await?;
        match job.status {
            JobStatus::Done => job.result.ok_or(JobError::ResultNotReady(job.status)),
            other => Err(JobError::ResultNotReady(other)),
        }
    }

    /// Cancel (§4.7).
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let mut registry = self.registry.lock().await;
        let job = registry.get_mut(job_id).ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Canceled;
                job.error = Some("canceled before dispatch".to_string());
                job.touch();
                let snapshot = job.clone();
                if let Err(e) = self.journal.append(&snapshot).await {
                    warn!(error = %e, job_id, "journal write failed on cancel");
                }
                Ok(())
            }
            JobStatus::Running => {
                let token = self.in_flight.lock().await.get(job_id).cloned();
                match token {
                    Some(token) => {
                        token.cancel();
                        job.status = JobStatus::Canceled;
                        job.error = Some("canceled while running".to_string());
                        job.touch();
                        let snapshot = job.clone();
                        if let Err(e) = self.journal.append(&snapshot).await {
                            warn!(error = %e, job_id, "journal write failed on cancel");
                        }
                        Ok(())
                    }
                    None => Err(JobError::NotCancelable(job.status)),
                }
            }
            other => Err(JobError::NotCancelable(other)),
        }
    }

    /// I1: terminal statuses are absorbing. A job already in a terminal
    /// status (e.g. `Canceled` by a racing `cancel()` call) must never be
    /// mutated again, even by a result or timeout that was already in flight.
    async fn set_status(&self, job_id: &str, mutate: impl FnOnce(&mut Job)) {
        let mut registry = self.registry.lock().await;
        if let Some(job) = registry.get_mut(job_id) {
            if job.status.is_terminal() {
                return;
            }
            mutate(job);
            job.touch();
            let snapshot = job.clone();
            drop(registry);
            if let Err(e) = self.journal.append(&snapshot).await {
                warn!(error = %e, job_id, "journal write failed");
            }
        }
    }

    /// The single long-running dispatcher task (§4.5).
    async fn run_dispatcher(
        self: Arc<Self>,
        mut high_rx: mpsc::Receiver<QueueItem>,
        mut normal_rx: mpsc::Receiver<QueueItem>,
        mut low_rx: mpsc::Receiver<QueueItem>,
    ) {
        loop {
            let coin_high_first = rand::thread_rng().gen_bool(0.5);
            let order: [&mut mpsc::Receiver<QueueItem>; 3] = if coin_high_first {
                [&mut high_rx, &mut normal_rx, &mut low_rx]
            } else {
                [&mut normal_rx, &mut high_rx, &mut low_rx]
            };

            let mut received = None;
            for rx in order {
                if let Ok(item) = rx.try_recv() {
                    received = Some(item);
                    break;
                }
            }

            let Some(item) = received else {
                tokio::time::sleep(DISPATCHER_IDLE_SLEEP).await;
                continue;
            };

            self.clone().dispatch_one(item).await;
        }
    }

    async fn dispatch_one(self: Arc<Self>, item: QueueItem) {
        let QueueItem { job_id, command, params } = item;

        {
            let mut registry = self.registry.lock().await;
            let Some(job) = registry.get_mut(&job_id) else {
                return;
            };
            // Q2: a canceled-while-queued job is skipped, not dispatched.
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Running;
            job.touch();
            let snapshot = job.clone();
            drop(registry);
            if let Err(e) = self.journal.append(&snapshot).await {
                warn!(error = %e, job_id, "journal write failed");
            }
        }

        let Some(pool) = self.pools.get(&command).await else {
            // No pool registered for this command: run inline, synchronously,
            // with no cancellation support (§4.5 step 2).
            let cancel = CancelToken::new();
            let command_for_blocking = command.clone();
            let params_for_blocking = params.clone();
            let artifact = tokio::task::spawn_blocking(move || {
                run_algorithm(&command_for_blocking, &params_for_blocking, &cancel)
            })
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, job_id, "inline job panicked");
                ResponseArtifact::json(500, "Internal Server Error", &serde_json::json!({ "error": "panicked" }))
            });
            self.set_status(&job_id, |job| {
                job.status = JobStatus::Done;
                job.result = Some(artifact);
            })
            .await;
            return;
        };

        let cancel = CancelToken::new();
        match pool.try_enqueue(job_id.clone(), command.clone(), params.clone(), cancel.clone()) {
            Ok(result_rx) => {
                self.in_flight.lock().await.insert(job_id.clone(), cancel.clone());
                let job = match self.get_meta(&job_id).await {
                    Ok(job) => job,
                    Err(_) => return,
                };
                tokio::spawn(self.clone().supervise(job_id, job.timeout_ms, result_rx, cancel));
            }
            Err(JobError::QueueFull) => {
                self.set_status(&job_id, |job| {
                    job.status = JobStatus::Queued;
                    job.error = Some("pool full".to_string());
                })
                .await;
                self.schedule_requeue(job_id, command, params).await;
            }
            Err(_) => unreachable!("try_enqueue only returns QueueFull"),
        }
    }

    async fn schedule_requeue(self: Arc<Self>, job_id: JobId, command: String, params: HashMap<String, String>) {
        tokio::spawn(async move {
            tokio::time::sleep(POOL_FULL_REQUEUE_DELAY).await;
            let item = QueueItem { job_id: job_id.clone(), command, params };
            if self.try_send(JobPriority::Normal, item).is_err() {
                self.set_status(&job_id, |job| {
                    job.status = JobStatus::Error;
                    job.error = Some("unable to enqueue to pool".to_string());
                })
                .await;
            }
        });
    }

    /// Timeout Supervisor (§4.6): races the result channel against the
    /// per-job deadline. Capacity-1, single-sender oneshot means no
    /// lost-wakeup risk either way.
    async fn supervise(
        self: Arc<Self>,
        job_id: JobId,
        timeout_ms: u64,
        result_rx: oneshot::Receiver<ResponseArtifact>,
        cancel: CancelToken,
    ) {
        tokio::select! {
            result = result_rx => {
                match result {
                    Ok(artifact) => {
                        self.set_status(&job_id, |job| {
                            job.status = JobStatus::Done;
                            job.result = Some(artifact);
                        }).await;
                    }
                    Err(_) => {
                        self.set_status(&job_id, |job| {
                            job.status = JobStatus::Error;
                            job.error = Some("worker dropped result channel".to_string());
                        }).await;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                cancel.cancel();
                self.set_status(&job_id, |job| {
                    job.status = JobStatus::Timeout;
                    job.error = Some(format!("timed out after {timeout_ms} ms"));
                }).await;
            }
        }
        self.in_flight.lock().await.remove(&job_id);
    }

    /// `SubmitAndWait` (§4.2, Q3): submit then block for a result, capped at
    /// a fixed 30s wall-clock bound distinct from the per-command timeout.
    pub async fn submit_and_wait(
        self: &Arc<Self>,
        command: impl Into<String>,
        params: HashMap<String, String>,
        priority: JobPriority,
    ) -> Result<ResponseArtifact, JobError> {
        let job_id = self.submit(command, params, priority).await?;
        let deadline = tokio::time::Instant::now() + SUBMIT_AND_WAIT_BOUND;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(JobError::ResultNotReady(JobStatus::Running));
            }
            let job = self.get_meta(&job_id).await?;
            match job.status {
                JobStatus::Done => return job.result.ok_or(JobError::ResultNotReady(job.status)),
                JobStatus::Error | JobStatus::Canceled | JobStatus::Timeout => {
                    return Err(JobError::ResultNotReady(job.status))
                }
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::pool::PoolRegistry;

    async fn make_manager(queue_depth: usize, max_total: usize) -> Arc<JobManager> {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::open(dir.path().join("journal.jsonl")).unwrap());
        let pools = Arc::new(PoolRegistry::new());
        pools.init_pool("fibonacci", 1, 4).await;
        let config = JobManagerConfig {
            queue_depth,
            max_total,
            timeouts: HashMap::new(),
            default_timeout_ms: 5000,
        };
        JobManager::new(config, pools, journal)
    }

    #[tokio::test]
    async fn test_submit_and_poll_to_done() {
        let manager = make_manager(10, 50).await;
        let mut params = HashMap::new();
        params.insert("num".to_string(), "10".to_string());
        let job_id = manager.submit("fibonacci", params, JobPriority::Normal).await.unwrap();

        let mut job = manager.get_meta(&job_id).await.unwrap();
        for _ in 0..200 {
            if job.status == JobStatus::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            job = manager.get_meta(&job_id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Done);
        let result = manager.get_result(&job_id).await.unwrap();
        assert_eq!(result.status_code, 200);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_and_does_not_journal() {
        let manager = make_manager(1, 0).await;
        let res = manager.submit("fibonacci", HashMap::new(), JobPriority::Normal).await;
        assert!(matches!(res, Err(JobError::QueueFull)));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let manager = make_manager(10, 50).await;
        // Occupy the lone fibonacci worker with a long computation first so the
        // next submission stays queued long enough to be canceled pre-dispatch.
        let mut long = HashMap::new();
        long.insert("num".to_string(), "100000".to_string());
        let _busy = manager.submit("fibonacci", long, JobPriority::Normal).await.unwrap();

        let mut params = HashMap::new();
        params.insert("num".to_string(), "3".to_string());
        let job_id = manager.submit("fibonacci", params, JobPriority::Low).await.unwrap();
        let cancel_res = manager.cancel(&job_id).await;
        assert!(cancel_res.is_ok() || manager.get_meta(&job_id).await.unwrap().status != JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_not_found() {
        let manager = make_manager(10, 50).await;
        let res = manager.cancel("nonexistent").await;
        assert!(matches!(res, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_result_not_ready_before_done() {
        let manager = make_manager(10, 50).await;
        let mut params = HashMap::new();
        params.insert("num".to_string(), "5".to_string());
        let job_id = manager.submit("fibonacci", params, JobPriority::Normal).await.unwrap();
        // Immediately after submit the job is almost certainly still queued.
        let immediate = manager.get_result(&job_id).await;
        if manager.get_meta(&job_id).await.unwrap().status != JobStatus::Done {
            assert!(matches!(immediate, Err(JobError::ResultNotReady(_))));
        }
    }
}
