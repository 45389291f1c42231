//! OpenCine Core: error type, configuration, scenes, work areas, job context.

pub mod config;
pub mod context;
pub mod error;
pub mod types;
pub mod work_area;

pub use config::{CineConfig, DataPaths, ModelConfig, PublishBackend, PublishConfig};
pub use context::JobContext;
pub use error::{Error, Result};
pub use types::{JobStatus, Scene, ShotType, Stage};
pub use work_area::WorkArea;
