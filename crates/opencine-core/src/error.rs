//! Error types for OpenCine.

use thiserror::Error;

use crate::types::Stage;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No factory registered for resource type: {0}")]
    UnregisteredResource(String),

    #[error("Script generation error: {0}")]
    ScriptGeneration(String),

    #[error("{stage} stage failed: {message}")]
    StageFailure { stage: Stage, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job deadline exceeded")]
    DeadlineExceeded,

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a stage failure from any displayable cause.
    pub fn stage(stage: Stage, cause: impl std::fmt::Display) -> Self {
        Self::StageFailure {
            stage,
            message: cause.to_string(),
        }
    }

    /// Attribute an error to a pipeline stage.
    ///
    /// Taxonomy errors and interruptions pass through unchanged; everything
    /// else becomes a `StageFailure` for `stage`.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::StageFailure { .. }
            | Self::ScriptGeneration(_)
            | Self::UnregisteredResource(_)
            | Self::Cancelled
            | Self::DeadlineExceeded => self,
            other => Self::stage(stage, other),
        }
    }

    /// Whether the job was stopped from outside rather than failing on its own.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_wraps_infrastructure_errors() {
        let err = Error::Http("connection refused".into()).in_stage(Stage::Clip);
        match err {
            Error::StageFailure { stage, message } => {
                assert_eq!(stage, Stage::Clip);
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_in_stage_keeps_taxonomy_errors() {
        let err = Error::ScriptGeneration("empty".into()).in_stage(Stage::Script);
        assert!(matches!(err, Error::ScriptGeneration(_)));

        let err = Error::stage(Stage::Keyframe, "boom").in_stage(Stage::Clip);
        assert!(matches!(
            err,
            Error::StageFailure {
                stage: Stage::Keyframe,
                ..
            }
        ));

        assert!(Error::Cancelled.in_stage(Stage::Audio).is_interruption());
    }

    #[test]
    fn test_stage_failure_message() {
        let err = Error::stage(Stage::Publish, "bucket missing");
        assert_eq!(err.to_string(), "publish stage failed: bucket missing");
    }
}
