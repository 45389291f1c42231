//! Clip stage: animates a scene keyframe into a short video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use opencine_accel::{AcceleratorManager, ClipRequest, ResourceType};
use opencine_core::{Error, JobContext, Result, Scene, WorkArea};

/// Renders the motion clip for a scene from its keyframe.
pub trait ClipStage: Send + Sync {
    fn generate(
        &self,
        scene: &Scene,
        keyframe: &Path,
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<PathBuf>;
}

/// Clip stage that runs on the shared accelerator.
pub struct AcceleratedClipStage {
    manager: Arc<AcceleratorManager>,
}

impl AcceleratedClipStage {
    pub fn new(manager: Arc<AcceleratorManager>) -> Self {
        Self { manager }
    }
}

impl ClipStage for AcceleratedClipStage {
    fn generate(
        &self,
        scene: &Scene,
        keyframe: &Path,
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<PathBuf> {
        if !keyframe.exists() {
            return Err(Error::Internal(format!(
                "keyframe missing for scene {}: {}",
                scene.scene_id,
                keyframe.display()
            )));
        }

        let output_path = area.clip_path(scene.scene_id);
        let lease = self.manager.acquire(ResourceType::Video, ctx)?;
        let model = lease
            .as_video()
            .ok_or_else(|| Error::Internal("video lease holds a non-video resource".into()))?;

        model.generate(
            &ClipRequest {
                prompt: &scene.visual_prompt,
                keyframe_path: keyframe,
                output_path: &output_path,
            },
            ctx,
        )?;
        info!("Clip for scene {} at {}", scene.scene_id, output_path.display());
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencine_accel::{Resource, ResourceHandle, VideoModel};
    use opencine_core::ShotType;

    struct CopyingModel;

    impl ResourceHandle for CopyingModel {
        fn activate(&self) -> Result<()> {
            Ok(())
        }

        fn deactivate(&self) -> Result<()> {
            Ok(())
        }
    }

    impl VideoModel for CopyingModel {
        fn generate(&self, req: &ClipRequest<'_>, _ctx: &JobContext) -> Result<()> {
            std::fs::copy(req.keyframe_path, req.output_path)?;
            Ok(())
        }
    }

    fn scene() -> Scene {
        Scene {
            scene_id: 7,
            visual_prompt: "waves crash on rocks".into(),
            dialogue: "Storm's coming.".into(),
            shot_type: ShotType::Medium,
        }
    }

    fn manager() -> Arc<AcceleratorManager> {
        let manager = Arc::new(AcceleratorManager::new());
        manager.register_factory(ResourceType::Video, || {
            Ok(Resource::Video(Arc::new(CopyingModel)))
        });
        manager
    }

    #[test]
    fn test_clip_from_keyframe() {
        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::allocate(tmp.path()).unwrap();
        let keyframe = area.keyframe_path(7);
        std::fs::write(&keyframe, b"still").unwrap();

        let stage = AcceleratedClipStage::new(manager());
        let clip = stage
            .generate(&scene(), &keyframe, &area, &JobContext::background())
            .unwrap();

        assert_eq!(clip, area.clip_path(7));
        assert_eq!(std::fs::read(&clip).unwrap(), b"still");
    }

    #[test]
    fn test_missing_keyframe_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::allocate(tmp.path()).unwrap();
        let stage = AcceleratedClipStage::new(manager());

        let result = stage.generate(
            &scene(),
            &area.keyframe_path(7),
            &area,
            &JobContext::background(),
        );
        assert!(result.is_err());
    }
}
