//! OpenCine Accel: exclusive accelerator residency for heavy models.
//!
//! `AcceleratorManager` guarantees that at most one `Resource` is resident
//! on the accelerator at any time. The keyframe and video resources shipped
//! here are hosted by an external model server (`served`); tests and
//! alternative backends plug in their own `KeyframeModel`/`VideoModel`.

pub mod manager;
pub mod resource;
pub mod served;

pub use manager::{AcceleratorLease, AcceleratorManager, MemoryReclaimer, ResourceFactory};
pub use resource::{
    ClipRequest, KeyframeModel, KeyframeRequest, Resource, ResourceHandle, ResourceType,
    VideoModel,
};
pub use served::{
    keyframe_factory, video_factory, ModelServerClient, ModelServerReclaimer, ServedKeyframeModel,
    ServedVideoModel,
};
