pub mod config;
pub mod error;
pub mod jobs;

pub use config::Config;
pub use error::{Error, Result};
pub use jobs::{
    CancelToken, Job, JobError, JobId, JobManager, JobManagerConfig, JobPriority, JobStatus, Journal, PoolInfo,
    PoolMetrics, PoolRegistry, ResponseArtifact, WorkerPool,
};

/// Current version of the job server core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_config_error_creation() {
        let err = Error::config("bad value");
        assert!(err.to_string().contains("bad value"));
    }
}
