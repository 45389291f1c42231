//! Shared domain types: job status, scenes, pipeline stages.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Script,
    Keyframe,
    Clip,
    Audio,
    Stitch,
    Mix,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Keyframe => write!(f, "keyframe"),
            Self::Clip => write!(f, "clip"),
            Self::Audio => write!(f, "audio"),
            Self::Stitch => write!(f, "stitch"),
            Self::Mix => write!(f, "mix"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// Camera framing requested for a scene.
///
/// The script generator is asked for one of the named framings but is free
/// to answer anything; unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShotType {
    Wide,
    Medium,
    CloseUp,
    Other(String),
}

impl From<String> for ShotType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "wide" => Self::Wide,
            "medium" => Self::Medium,
            "close-up" | "closeup" | "close up" => Self::CloseUp,
            _ => Self::Other(s),
        }
    }
}

impl From<ShotType> for String {
    fn from(shot: ShotType) -> Self {
        match shot {
            ShotType::Wide => "wide".into(),
            ShotType::Medium => "medium".into(),
            ShotType::CloseUp => "close-up".into(),
            ShotType::Other(s) => s,
        }
    }
}

/// One narrative unit of a render job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: u32,
    pub visual_prompt: String,
    pub dialogue: String,
    pub shot_type: ShotType,
}
