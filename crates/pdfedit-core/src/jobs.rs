//! In-memory job records
//!
//! Jobs live for the life of the process; nothing is evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Failure reason, or a note on success
    pub message: Option<String>,
    /// Where the finished artifact is stored
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            status: JobStatus::Pending,
            message: None,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registry of jobs keyed by id.
///
/// Callers only ever see clones; records change through [`create`](Self::create)
/// and [`set_status`](Self::set_status).
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending job, replacing any job with the same id
    pub fn create(&self, id: &str) -> Job {
        let job = Job::new(id);
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Update a job's status, creating the job if it does not exist.
    ///
    /// `message` and `output` overwrite the stored values only when provided.
    pub fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<String>,
        output: Option<String>,
    ) -> Job {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs.entry(id.to_string()).or_insert_with(|| Job::new(id));
        job.status = status;
        if message.is_some() {
            job.message = message;
        }
        if output.is_some() {
            job.output = output;
        }
        job.updated_at = Utc::now();
        job.clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_starts_pending() {
        let registry = JobRegistry::new();
        let job = registry.create("job-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.message, None);
        assert_eq!(registry.get("job-1"), Some(job));
    }

    #[test]
    fn test_unknown_job_is_none() {
        let registry = JobRegistry::new();
        assert_eq!(registry.get("missing"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_status_creates_missing_job() {
        let registry = JobRegistry::new();
        let job = registry.set_status("late", JobStatus::Failed, Some("boom".into()), None);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message.as_deref(), Some("boom"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_status_keeps_unspecified_fields() {
        let registry = JobRegistry::new();
        registry.create("job");
        registry.set_status("job", JobStatus::Processing, Some("working".into()), None);
        let job = registry.set_status("job", JobStatus::Completed, None, Some("/tmp/out.pdf".into()));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.message.as_deref(), Some("working"));
        assert_eq!(job.output.as_deref(), Some("/tmp/out.pdf"));
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_create_overwrites_existing_job() {
        let registry = JobRegistry::new();
        registry.set_status("job", JobStatus::Failed, Some("old".into()), None);
        registry.create("job");
        let job = registry.get("job").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.message, None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(JobStatus::Completed.to_string(), "completed");
    }
}
