//! Heavy compute resources that can occupy the accelerator.

use std::path::Path;
use std::sync::Arc;

use opencine_core::{JobContext, Result};

/// Kind of heavy resource the accelerator can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Text+image to still image (keyframes).
    Keyframe,
    /// Image to video (scene clips).
    Video,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyframe => write!(f, "keyframe"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Capability to move a resource onto and off the accelerator.
pub trait ResourceHandle: Send + Sync {
    /// Bring the resource onto the accelerator.
    fn activate(&self) -> Result<()>;

    /// Move the resource off the accelerator, releasing its device memory.
    fn deactivate(&self) -> Result<()>;
}

/// Inputs for one keyframe synthesis.
#[derive(Debug, Clone, Copy)]
pub struct KeyframeRequest<'a> {
    pub prompt: &'a str,
    pub face_reference: Option<&'a str>,
    pub output_path: &'a Path,
}

/// Inputs for one clip synthesis.
#[derive(Debug, Clone, Copy)]
pub struct ClipRequest<'a> {
    pub prompt: &'a str,
    pub keyframe_path: &'a Path,
    pub output_path: &'a Path,
}

/// Still-image synthesis engine.
pub trait KeyframeModel: ResourceHandle {
    /// Whether the face-conditioning adapter loaded when the model was built.
    fn supports_face_conditioning(&self) -> bool;

    /// Render a keyframe to `req.output_path`.
    fn generate(&self, req: &KeyframeRequest<'_>, ctx: &JobContext) -> Result<()>;
}

/// Image-conditioned video synthesis engine.
pub trait VideoModel: ResourceHandle {
    /// Render a clip to `req.output_path`.
    fn generate(&self, req: &ClipRequest<'_>, ctx: &JobContext) -> Result<()>;
}

/// One heavy resource, tagged by kind.
#[derive(Clone)]
pub enum Resource {
    Keyframe(Arc<dyn KeyframeModel>),
    Video(Arc<dyn VideoModel>),
}

impl Resource {
    pub fn kind(&self) -> ResourceType {
        match self {
            Self::Keyframe(_) => ResourceType::Keyframe,
            Self::Video(_) => ResourceType::Video,
        }
    }

    pub fn as_keyframe(&self) -> Option<&dyn KeyframeModel> {
        match self {
            Self::Keyframe(m) => Some(m.as_ref()),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&dyn VideoModel> {
        match self {
            Self::Video(m) => Some(m.as_ref()),
            _ => None,
        }
    }
}

impl ResourceHandle for Resource {
    fn activate(&self) -> Result<()> {
        match self {
            Self::Keyframe(m) => m.activate(),
            Self::Video(m) => m.activate(),
        }
    }

    fn deactivate(&self) -> Result<()> {
        match self {
            Self::Keyframe(m) => m.deactivate(),
            Self::Video(m) => m.deactivate(),
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Resource({})", self.kind())
    }
}
