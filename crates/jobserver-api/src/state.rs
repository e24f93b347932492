use std::sync::Arc;

use jobserver_core::JobManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager, started_at: chrono::Utc::now() }
    }
}
