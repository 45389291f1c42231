//! Keyframe stage: one still per scene on the accelerator.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use opencine_accel::{AcceleratorManager, KeyframeRequest, ResourceType};
use opencine_core::{Error, JobContext, Result, Scene, WorkArea};

/// Renders the establishing still for a scene.
pub trait KeyframeStage: Send + Sync {
    fn generate(
        &self,
        scene: &Scene,
        face_reference: Option<&str>,
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<PathBuf>;
}

/// Keyframe stage that runs on the shared accelerator.
pub struct AcceleratedKeyframeStage {
    manager: Arc<AcceleratorManager>,
}

impl AcceleratedKeyframeStage {
    pub fn new(manager: Arc<AcceleratorManager>) -> Self {
        Self { manager }
    }
}

impl KeyframeStage for AcceleratedKeyframeStage {
    fn generate(
        &self,
        scene: &Scene,
        face_reference: Option<&str>,
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<PathBuf> {
        let output_path = area.keyframe_path(scene.scene_id);
        let lease = self.manager.acquire(ResourceType::Keyframe, ctx)?;
        let model = lease
            .as_keyframe()
            .ok_or_else(|| Error::Internal("keyframe lease holds a non-keyframe resource".into()))?;

        // Conditioning is skipped when the adapter never loaded.
        let face_reference = match face_reference {
            Some(face) if model.supports_face_conditioning() => Some(face),
            Some(_) => {
                warn!(
                    "Face reference ignored for scene {}: adapter unavailable",
                    scene.scene_id
                );
                None
            }
            None => None,
        };

        model.generate(
            &KeyframeRequest {
                prompt: &scene.visual_prompt,
                face_reference,
                output_path: &output_path,
            },
            ctx,
        )?;
        info!("Keyframe for scene {} at {}", scene.scene_id, output_path.display());
        Ok(output_path)
    }
}
