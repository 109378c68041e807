// Indexing job lifecycle and progress tracking

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPhase {
    Collecting,
    PreScanning,
    Writing,
    Linking,
    Enriching,
    Done,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Collecting => "collecting",
            JobPhase::PreScanning => "pre-scanning",
            JobPhase::Writing => "writing",
            JobPhase::Linking => "linking",
            JobPhase::Enriching => "enriching",
            JobPhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: String,
    pub path: PathBuf,
    pub is_dependency: bool,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub files_total: usize,
    pub files_processed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl IndexJob {
    pub fn new(path: &Path, is_dependency: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_path_buf(),
            is_dependency,
            status: JobStatus::Running,
            phase: JobPhase::Collecting,
            files_total: 0,
            files_processed: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Fraction of files processed, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.files_total == 0 {
            return 0.0;
        }
        self.files_processed as f64 / self.files_total as f64
    }

    fn apply(&mut self, update: JobUpdate) {
        if let Some(phase) = update.phase {
            self.phase = phase;
        }
        if let Some(total) = update.files_total {
            self.files_total = total;
        }
        if let Some(processed) = update.files_processed {
            self.files_processed = self.files_processed.max(processed);
        }
        self.files_processed += update.processed_increment;
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.completed_at = Some(Utc::now());
                self.phase = JobPhase::Done;
            }
        }
    }
}

/// Partial change to a job. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub phase: Option<JobPhase>,
    pub files_total: Option<usize>,
    /// Absolute count; never moves the counter backwards
    pub files_processed: Option<usize>,
    pub processed_increment: usize,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn phase(phase: JobPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn total(files_total: usize) -> Self {
        Self {
            files_total: Some(files_total),
            ..Default::default()
        }
    }

    pub fn file_done() -> Self {
        Self {
            processed_increment: 1,
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    Duplicate(String),
}

pub trait JobStore: Send + Sync {
    fn create(&self, job: IndexJob) -> Result<(), JobStoreError>;

    fn get(&self, id: &str) -> Option<IndexJob>;

    /// All retained jobs, oldest first
    fn get_all(&self) -> Vec<IndexJob>;

    /// Apply a partial update and return the job as it now stands. Updates
    /// to a job that already finished are ignored.
    fn update(&self, id: &str, update: JobUpdate) -> Result<IndexJob, JobStoreError>;
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, IndexJob>,
    order: VecDeque<String>,
}

/// Job store kept in process memory.
///
/// Running jobs are always retained; once more than `max_history` jobs have
/// finished, the oldest finished ones are dropped.
pub struct InMemoryJobStore {
    table: RwLock<JobTable>,
    max_history: usize,
}

impl InMemoryJobStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            table: RwLock::new(JobTable::default()),
            max_history,
        }
    }

    fn evict(&self, table: &mut JobTable) {
        let terminal = table
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .count();
        let mut excess = terminal.saturating_sub(self.max_history);
        if excess == 0 {
            return;
        }

        let JobTable { jobs, order } = table;
        order.retain(|id| {
            if excess == 0 {
                return true;
            }
            let finished = jobs.get(id).map(|j| j.status.is_terminal()).unwrap_or(true);
            if finished {
                jobs.remove(id);
                excess -= 1;
                debug!("Evicted job {}", id);
                false
            } else {
                true
            }
        });
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: IndexJob) -> Result<(), JobStoreError> {
        let mut table = self.table.write();
        if table.jobs.contains_key(&job.id) {
            return Err(JobStoreError::Duplicate(job.id));
        }
        table.order.push_back(job.id.clone());
        table.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<IndexJob> {
        self.table.read().jobs.get(id).cloned()
    }

    fn get_all(&self) -> Vec<IndexJob> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id).cloned())
            .collect()
    }

    fn update(&self, id: &str, update: JobUpdate) -> Result<IndexJob, JobStoreError> {
        let mut table = self.table.write();
        let job = table
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if job.status.is_terminal() {
            debug!("Ignoring update to finished job {}", id);
            return Ok(job.clone());
        }

        job.apply(update);
        let snapshot = job.clone();
        if snapshot.status.is_terminal() {
            self.evict(&mut table);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(store: &InMemoryJobStore, path: &str) -> String {
        let job = IndexJob::new(Path::new(path), false);
        let id = job.id.clone();
        store.create(job).unwrap();
        id
    }

    #[test]
    fn test_job_lifecycle() {
        let store = InMemoryJobStore::default();
        let id = new_job(&store, "/repo");

        store.update(&id, JobUpdate::phase(JobPhase::Writing)).unwrap();
        store.update(&id, JobUpdate::total(2)).unwrap();
        store.update(&id, JobUpdate::file_done()).unwrap();
        store.update(&id, JobUpdate::file_done()).unwrap();
        let job = store.update(&id, JobUpdate::completed()).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.phase, JobPhase::Done);
        assert_eq!(job.files_processed, job.files_total);
        assert!(job.completed_at.is_some());
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn test_terminal_job_ignores_updates() {
        let store = InMemoryJobStore::default();
        let id = new_job(&store, "/repo");

        store.update(&id, JobUpdate::failed("schema setup failed")).unwrap();
        let job = store.update(&id, JobUpdate::completed()).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("schema setup failed"));
    }

    #[test]
    fn test_processed_count_is_monotonic() {
        let store = InMemoryJobStore::default();
        let id = new_job(&store, "/repo");

        store
            .update(
                &id,
                JobUpdate {
                    files_processed: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        let job = store
            .update(
                &id,
                JobUpdate {
                    files_processed: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(job.files_processed, 5);
    }

    #[test]
    fn test_unknown_job() {
        let store = InMemoryJobStore::default();
        assert!(store.get("missing").is_none());
        assert!(matches!(
            store.update("missing", JobUpdate::completed()),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_retention_keeps_running_jobs() {
        let store = InMemoryJobStore::new(2);
        let running = new_job(&store, "/running");
        let finished: Vec<String> = (0..4).map(|i| new_job(&store, &format!("/r{}", i))).collect();
        for id in &finished {
            store.update(id, JobUpdate::completed()).unwrap();
        }

        let all = store.get_all();
        assert_eq!(all.len(), 3);
        assert!(store.get(&running).is_some());
        assert!(store.get(&finished[0]).is_none());
        assert!(store.get(&finished[1]).is_none());
        assert_eq!(all[1].id, finished[2]);
        assert_eq!(all[2].id, finished[3]);
    }
}
