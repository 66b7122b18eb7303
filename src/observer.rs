//! Job observer: optional execution-lifecycle reporting.
//!
//! When a host application runs a job tracker, the scheduler reports each
//! firing as a job (`processing` → `completed`/`failed`) so operators can
//! see what ran and what broke. Observation is best-effort; observer
//! failures never affect task execution.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle state of an observed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The task callback is running.
    Processing,
    /// The callback returned successfully.
    Completed,
    /// The callback returned an error.
    Failed,
}

/// Descriptor for a newly created job entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Job identifier, unique per firing (`scheduled_<name>_<epoch_ms>`).
    pub id: String,
    /// Human-readable title (`Scheduled: <name>`).
    pub title: String,
    /// Initial status.
    pub status: JobStatus,
}

/// Partial update applied to an existing job entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    /// New status, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Completion percentage (0-100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Error message for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobPatch {
    /// Patch marking a job completed at 100%.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            error: None,
        }
    }

    /// Patch marking a job failed with the given error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: None,
            error: Some(error.into()),
        }
    }
}

/// Records task-execution lifecycle for operator visibility.
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// Create a job entry for a firing that is about to run.
    async fn create(&self, job: JobDescriptor) -> Result<()>;

    /// Apply a patch to an existing job entry.
    async fn update(&self, job_id: &str, patch: JobPatch) -> Result<()>;
}

/// Observer that only emits tracing events.
///
/// The default for hosts without a job tracker: firings still leave an
/// operator-visible trail in the logs.
#[derive(Debug, Default)]
pub struct LogObserver;

#[async_trait]
impl JobObserver for LogObserver {
    async fn create(&self, job: JobDescriptor) -> Result<()> {
        debug!(job_id = %job.id, title = %job.title, "job started");
        Ok(())
    }

    async fn update(&self, job_id: &str, patch: JobPatch) -> Result<()> {
        match (&patch.status, &patch.error) {
            (Some(JobStatus::Failed), Some(error)) => {
                warn!(job_id = %job_id, error = %error, "job failed");
            }
            _ => debug!(job_id = %job_id, status = ?patch.status, "job updated"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_patch_sets_full_progress() {
        let patch = JobPatch::completed();
        assert_eq!(patch.status, Some(JobStatus::Completed));
        assert_eq!(patch.progress, Some(100));
        assert!(patch.error.is_none());
    }

    #[test]
    fn failed_patch_carries_message() {
        let patch = JobPatch::failed("boom");
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert_eq!(patch.error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Processing).expect("serialize");
        assert_eq!(json, "\"processing\"");
    }

    #[tokio::test]
    async fn log_observer_accepts_lifecycle() {
        let observer = LogObserver;
        observer
            .create(JobDescriptor {
                id: "scheduled_test_1".to_owned(),
                title: "Scheduled: test".to_owned(),
                status: JobStatus::Processing,
            })
            .await
            .expect("create");
        observer
            .update("scheduled_test_1", JobPatch::completed())
            .await
            .expect("update");
    }
}
