//! Runtime: job intake, the render orchestrator, status lookup.
//!
//! Intake persists a `Queued` job and returns at once. The orchestrator then
//! drives the job through screenplay, per-scene synthesis, assembly and
//! publishing, persisting the terminal status on every exit path.

pub mod intake;
pub mod orchestrator;
pub mod types;

pub use intake::{enqueue, job_status};
pub use orchestrator::{RenderOrchestrator, RenderStages};
pub use types::*;
