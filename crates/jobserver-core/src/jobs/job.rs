//! Job data model: identity, priority, status, and the response artifact produced
//! by a leaf algorithm.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque unique job identifier — a UUID rendered as a string, matching the Go
/// original's `util.NewRequestID()` (a thin wrapper over `uuid.NewString()`).
pub type JobId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Job priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

impl JobPriority {
    /// Parse from a query-string value; unrecognized or absent values fall back
    /// to `Normal`, per §6's HTTP surface table.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => JobPriority::High,
            "low" => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

/// Job execution status. Terminal statuses are absorbing (I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
    Timeout,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Timeout => write!(f, "timeout"),
        }
    }
}

impl JobStatus {
    /// I1: terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Canceled | JobStatus::Timeout
        )
    }

    /// `/jobs/status`'s `progress` field: 0 for queued, 50 for running, 100 for
    /// done, 0 for everything else (§6).
    pub fn progress(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 50,
            JobStatus::Done => 100,
            _ => 0,
        }
    }
}

/// Response artifact produced by a leaf algorithm: status code, status text,
/// case-preserving headers, and an opaque body (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseArtifact {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResponseArtifact {
    pub fn new(status_code: u16, status_text: impl Into<String>, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }

    pub fn json(status_code: u16, status_text: impl Into<String>, value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec_pretty(value).unwrap_or_else(|_| b"{}".to_vec());
        Self::new(status_code, status_text, "application/json", body)
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("application/octet-stream")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One submitted job and its lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub params: HashMap<String, String>,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub timeout_ms: u64,
    pub result: Option<ResponseArtifact>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(command: impl Into<String>, params: HashMap<String, String>, priority: JobPriority, timeout_ms: u64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_job_id(),
            command: command.into(),
            params,
            priority,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            timeout_ms,
            result: None,
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_priority_parse_defaults_to_normal() {
        assert_eq!(JobPriority::parse("bogus"), JobPriority::Normal);
        assert_eq!(JobPriority::parse("HIGH"), JobPriority::High);
    }

    #[test]
    fn test_status_terminal_and_progress() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert_eq!(JobStatus::Queued.progress(), 0);
        assert_eq!(JobStatus::Running.progress(), 50);
        assert_eq!(JobStatus::Done.progress(), 100);
        assert_eq!(JobStatus::Error.progress(), 0);
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new("fibonacci", HashMap::new(), JobPriority::Normal, 3000);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.timeout_ms, 3000);
        assert!(job.result.is_none());
    }
}
