//! Intake and status lookup.

use tracing::info;
use uuid::Uuid;

use opencine_core::{Error, Result};
use opencine_store::{JobStore, RenderJob};

use crate::types::RenderRequest;

/// Validate a request and persist it as a `Queued` job.
///
/// Returns immediately; rendering happens elsewhere.
pub fn enqueue(
    store: &dyn JobStore,
    request: &RenderRequest,
    min_prompt_chars: usize,
) -> Result<RenderJob> {
    let prompt = request.prompt.trim();
    if prompt.chars().count() < min_prompt_chars {
        return Err(Error::InvalidRequest(format!(
            "prompt must be at least {} characters",
            min_prompt_chars
        )));
    }

    let face = request
        .face_reference_image
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());

    let task_id = Uuid::new_v4().to_string();
    let job = store.create(&task_id, prompt, face)?;
    info!("Queued render job {}", task_id);
    Ok(job)
}

/// Current record of a job.
pub fn job_status(store: &dyn JobStore, task_id: &str) -> Result<RenderJob> {
    store
        .find_by_task_id(task_id)?
        .ok_or_else(|| Error::JobNotFound(task_id.to_string()))
}
