//! Background merge jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not started.
    Scheduled,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether the job has finished either way.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A rebase or promotion run in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchMergeJob {
    /// Job id.
    pub id: String,
    /// Branch merged from.
    pub source: String,
    /// Branch merged into.
    pub target: String,
    /// Current status.
    pub status: JobStatus,
    /// When the job was accepted.
    pub scheduled_date: DateTime<Utc>,
    /// When the job started running.
    pub start_date: Option<DateTime<Utc>>,
    /// When the job finished.
    pub end_date: Option<DateTime<Utc>>,
    /// Failure message.
    pub message: Option<String>,
}

impl BranchMergeJob {
    /// Creates a scheduled job.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            target: target.to_string(),
            status: JobStatus::Scheduled,
            scheduled_date: Utc::now(),
            start_date: None,
            end_date: None,
            message: None,
        }
    }

    /// Moves the job to IN_PROGRESS.
    pub fn start(&mut self) {
        self.status = JobStatus::InProgress;
        self.start_date = Some(Utc::now());
    }

    /// Moves the job to COMPLETED.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.end_date = Some(Utc::now());
    }

    /// Moves the job to FAILED with a message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.end_date = Some(Utc::now());
        self.message = Some(message.into());
    }
}

struct JobEntry {
    job: Mutex<BranchMergeJob>,
    status: watch::Sender<JobStatus>,
}

/// Jobs by id, dropped after a time to live.
#[derive(Clone)]
pub struct JobStore {
    jobs: Cache<String, Arc<JobEntry>>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.jobs.entry_count())
            .finish()
    }
}

impl JobStore {
    /// Creates a store keeping jobs for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Adds a job.
    pub fn insert(&self, job: BranchMergeJob) {
        let (status, _) = watch::channel(job.status);
        let id = job.id.clone();
        self.jobs.insert(
            id,
            Arc::new(JobEntry {
                job: Mutex::new(job),
                status,
            }),
        );
    }

    /// Snapshot of a job.
    pub fn get(&self, id: &str) -> Option<BranchMergeJob> {
        self.jobs.get(id).map(|entry| entry.job.lock().clone())
    }

    /// Applies a change to a job and notifies waiters.
    pub fn update(&self, id: &str, change: impl FnOnce(&mut BranchMergeJob)) -> Option<BranchMergeJob> {
        let entry = self.jobs.get(id)?;
        let mut job = entry.job.lock();
        change(&mut *job);
        entry.status.send_replace(job.status);
        Some(job.clone())
    }

    /// Waits until a job has finished and returns it.
    ///
    /// `None` for unknown ids and for jobs that expire while being waited on.
    pub async fn wait(&self, id: &str) -> Option<BranchMergeJob> {
        let mut status = self.jobs.get(id)?.status.subscribe();
        status.wait_for(|s| s.is_finished()).await.ok()?;
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> JobStore {
        JobStore::new(Duration::from_secs(60))
    }

    #[test]
    fn test_job_lifecycle() {
        let store = make_store();
        let job = BranchMergeJob::new("MAIN", "MAIN/A");
        let id = job.id.clone();
        store.insert(job);

        assert_eq!(store.get(&id).unwrap().status, JobStatus::Scheduled);
        let started = store.update(&id, BranchMergeJob::start).unwrap();
        assert_eq!(started.status, JobStatus::InProgress);
        assert!(started.start_date.is_some());

        let failed = store.update(&id, |job| job.fail("Child branch must be rebased before promoted.")).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.end_date.is_some());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_status_serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&JobStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_returns_finished_job() {
        let store = make_store();
        let job = BranchMergeJob::new("MAIN/A", "MAIN");
        let id = job.id.clone();
        store.insert(job);

        let worker = store.clone();
        let worker_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.update(&worker_id, BranchMergeJob::start);
            worker.update(&worker_id, BranchMergeJob::complete);
        });

        let finished = store.wait(&id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(store.wait("missing").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_ends_when_job_expires() {
        let store = JobStore::new(Duration::from_millis(50));
        let job = BranchMergeJob::new("MAIN/A", "MAIN");
        let id = job.id.clone();
        store.insert(job);

        let waiter = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.wait(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        store.jobs.run_pending_tasks();

        let waited = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(waited.is_none());
        assert!(store.get(&id).is_none());
    }
}
