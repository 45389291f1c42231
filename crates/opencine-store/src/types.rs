//! Job record and the store contract.

use opencine_core::{JobStatus, Result};
use serde::{Deserialize, Serialize};

/// A render job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: i64,
    pub task_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_reference_image: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Persisted job records, looked up by task id.
///
/// Every mutation is a single-row update; callers need no extra locking.
pub trait JobStore: Send + Sync {
    /// Insert a new job in the `Queued` state.
    fn create(
        &self,
        task_id: &str,
        prompt: &str,
        face_reference_image: Option<&str>,
    ) -> Result<RenderJob>;

    fn find_by_task_id(&self, task_id: &str) -> Result<Option<RenderJob>>;

    /// Set the status (and the output URL, when given).
    /// Returns false when no job has this task id.
    fn update_status(
        &self,
        task_id: &str,
        status: JobStatus,
        output_url: Option<&str>,
    ) -> Result<bool>;

    /// Move a job from `Queued` to `Processing` in one conditional update.
    /// Returns false when the job is unknown or no longer queued, so only
    /// one run can ever claim it.
    fn claim_queued(&self, task_id: &str) -> Result<bool>;

    /// Move a job to `Failed`, recording why.
    fn mark_failed(&self, task_id: &str, reason: &str) -> Result<bool>;

    /// Most recently created jobs first.
    fn list_recent(&self, limit: usize) -> Result<Vec<RenderJob>>;

    /// Jobs still waiting to run, oldest first.
    fn list_queued(&self) -> Result<Vec<RenderJob>>;

    /// Fail every job still marked `Processing`. Used at start-up, when no run
    /// of this process can own those rows.
    fn fail_interrupted(&self) -> Result<usize>;
}
