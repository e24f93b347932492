//! Append-only JSON-Lines journal (§4.3, §6): one line per state transition,
//! fsync'd before the call returns, rehydrated on startup with last-line-wins
//! semantics. No direct teacher file — grounded on the Go original's
//! `internal/storage/journal.go` write-ahead-log shape, translated to
//! `std::fs`/`serde_json` with a `tokio::sync::Mutex` serializing writers.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::jobs::job::{Job, JobStatus};

/// Durable append-only record of job lifecycle transitions.
pub struct Journal {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Appends one job snapshot as a single JSON line, fsyncing before return
    /// so a crash never loses an acknowledged transition.
    pub async fn append(&self, job: &Job) -> Result<()> {
        let mut line = serde_json::to_vec(job)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Replays the journal, keeping only the latest record per job id
    /// (last-line-wins). Non-terminal jobs found this way did not finish
    /// before the process died, so they're flipped to `Error` and re-appended
    /// (Q1: "lost across restart" rather than resumed or silently dropped).
    pub async fn rehydrate(&self) -> Result<HashMap<String, Job>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let reader = BufReader::new(file);
        let mut jobs: HashMap<String, Job> = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Job>(&line) {
                Ok(job) => {
                    jobs.insert(job.id.clone(), job);
                }
                Err(e) => warn!(error = %e, "skipping malformed journal line"),
            }
        }
        for job in jobs.values_mut() {
            if !job.status.is_terminal() {
                job.status = JobStatus::Error;
                job.error = Some("lost across restart".to_string());
                job.touch();
                self.append(job).await?;
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobPriority;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn test_append_and_rehydrate_last_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();

        let mut job = Job::new("fibonacci", Map::new(), JobPriority::Normal, 3000);
        journal.append(&job).await.unwrap();
        job.status = JobStatus::Done;
        journal.append(&job).await.unwrap();

        let rehydrated = journal.rehydrate().await.unwrap();
        let replayed = rehydrated.get(&job.id).unwrap();
        assert_eq!(replayed.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_rehydrate_marks_non_terminal_jobs_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();

        let job = Job::new("sleep", Map::new(), JobPriority::Normal, 3000);
        journal.append(&job).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let rehydrated = journal.rehydrate().await.unwrap();
        let replayed = rehydrated.get(&job.id).unwrap();
        assert_eq!(replayed.status, JobStatus::Error);
        assert_eq!(replayed.error.as_deref(), Some("lost across restart"));
    }

    #[tokio::test]
    async fn test_rehydrate_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.jsonl");
        let journal = Journal::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let rehydrated = journal.rehydrate().await.unwrap();
        assert!(rehydrated.is_empty());
    }
}
