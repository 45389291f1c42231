//! Runtime types.

use serde::{Deserialize, Serialize};

/// A render request as accepted at intake.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderRequest {
    pub prompt: String,
    #[serde(default)]
    pub face_reference_image: Option<String>,
}

/// Result of one successful render run.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub task_id: String,
    pub run_id: String,
    pub scene_count: usize,
    pub output_url: String,
}
