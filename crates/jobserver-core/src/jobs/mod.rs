//! Job execution pipeline: per-command worker pools bound to a priority
//! dispatcher, a journaled registry, and cooperative cancellation with
//! per-job timeouts. No external queue broker — everything lives in the
//! process, coordinated with tokio channels and a couple of locks.

pub mod algorithms;
pub mod cancel;
pub mod job;
pub mod journal;
pub mod manager;
pub mod metrics;
pub mod pool;

pub use cancel::CancelToken;
pub use job::{Job, JobId, JobPriority, JobStatus, ResponseArtifact};
pub use journal::Journal;
pub use manager::{JobManager, JobManagerConfig};
pub use metrics::PoolMetrics;
pub use pool::{PoolInfo, PoolRegistry, WorkerPool};

/// Domain errors surfaced by the Job Manager and Worker Pool (§7). Distinct
/// from `crate::Error`, which covers infrastructure failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("queue full")]
    QueueFull,

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job not cancelable in status {0}")]
    NotCancelable(JobStatus),

    #[error("result not ready: status {0}")]
    ResultNotReady(JobStatus),
}

impl From<JobError> for crate::Error {
    fn from(err: JobError) -> Self {
        crate::Error::Other(err.to_string())
    }
}
