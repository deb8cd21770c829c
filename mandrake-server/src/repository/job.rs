//! Job Repository
//!
//! In-memory registry of job records. The HTTP handlers and the executor
//! workers read and write the same records concurrently; every access goes
//! through the table lock so no caller observes a half-applied update.

use mandrake_core::domain::job::{Job, JobState};
use mandrake_core::dto::job::JobMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Registry error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Job {0} not found")]
    NotFound(Uuid),
}

/// Process-wide job store
#[derive(Debug)]
pub struct JobRegistry {
    /// Base directory; each job's context lives in `<context_base>/<id>`
    context_base: PathBuf,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new(context_base: impl Into<PathBuf>) -> Self {
        Self {
            context_base: context_base.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn context_base(&self) -> &Path {
        &self.context_base
    }

    /// Create a new job in the `WAITING` state
    pub fn create(&self) -> Job {
        let mut jobs = self.jobs.write();

        // v4 collisions are not expected, but never overwrite a live record
        let mut id = Uuid::new_v4();
        while jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let job = Job::new(id, &self.context_base);
        jobs.insert(id, job.clone());

        job
    }

    /// Find a job by ID
    pub fn get(&self, id: Uuid) -> Result<Job, RegistryError> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Apply `mutation` to a job under exclusive access to the table
    ///
    /// Returns whatever the mutation returns. `updated_at` is refreshed.
    pub fn update<T>(
        &self,
        id: Uuid,
        mutation: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, RegistryError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        let result = mutation(job);
        job.updated_at = chrono::Utc::now();

        Ok(result)
    }

    /// Snapshot of all jobs
    pub fn list(&self) -> JobMap {
        self.jobs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Number of jobs currently in any of `states`
    pub fn count_in(&self, states: &[JobState]) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| states.contains(&job.state))
            .count()
    }
}
