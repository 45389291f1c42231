//! Render orchestrator: drives one job from prompt to published video.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use opencine_core::{Error, JobContext, JobStatus, Result, Scene, Stage, WorkArea};
use opencine_stages::{AudioStage, ClipStage, KeyframeStage, Publisher, ScriptWriter, Stitcher};
use opencine_store::{JobStore, RenderJob};

use crate::types::RenderOutcome;

/// The collaborators a render run calls into.
#[derive(Clone)]
pub struct RenderStages {
    pub script: Arc<dyn ScriptWriter>,
    pub keyframe: Arc<dyn KeyframeStage>,
    pub clip: Arc<dyn ClipStage>,
    pub audio: Arc<dyn AudioStage>,
    pub stitcher: Arc<dyn Stitcher>,
    pub publisher: Arc<dyn Publisher>,
}

/// Persists `Failed` for the job unless the run reached `Completed`.
///
/// Covers early returns and panics alike, so no job is left `Processing`.
struct FailureGuard<'a> {
    store: &'a dyn JobStore,
    task_id: &'a str,
    armed: bool,
}

impl<'a> FailureGuard<'a> {
    fn new(store: &'a dyn JobStore, task_id: &'a str) -> Self {
        Self {
            store,
            task_id,
            armed: true,
        }
    }

    fn fail(&mut self, reason: &str) {
        if let Err(e) = self.store.mark_failed(self.task_id, reason) {
            error!("Could not mark job {} failed: {}", self.task_id, e);
        }
        self.armed = false;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FailureGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.fail("render aborted");
        }
    }
}

/// Runs render jobs against a set of stages.
pub struct RenderOrchestrator {
    store: Arc<dyn JobStore>,
    stages: RenderStages,
    output_root: PathBuf,
    crossfade_secs: f64,
}

impl RenderOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        stages: RenderStages,
        output_root: impl Into<PathBuf>,
        crossfade_secs: f64,
    ) -> Self {
        Self {
            store,
            stages,
            output_root: output_root.into(),
            crossfade_secs,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Render a queued job to completion.
    ///
    /// The outcome is persisted before returning: `Completed` with the
    /// published URL, or `Failed` with the error that stopped the run.
    pub fn run(&self, task_id: &str, ctx: &JobContext) -> Result<RenderOutcome> {
        let job = self
            .store
            .find_by_task_id(task_id)?
            .ok_or_else(|| Error::JobNotFound(task_id.to_string()))?;
        if job.status != JobStatus::Queued {
            return Err(Error::InvalidRequest(format!(
                "job {} is {}, not queued",
                task_id, job.status
            )));
        }

        if !self.store.claim_queued(task_id)? {
            return Err(Error::InvalidRequest(format!(
                "job {} was claimed by another run",
                task_id
            )));
        }
        let mut guard = FailureGuard::new(self.store.as_ref(), task_id);
        let started = Instant::now();
        info!("Render job {} started", task_id);

        match self.render(&job, ctx) {
            Ok(outcome) => {
                self.store.update_status(
                    task_id,
                    JobStatus::Completed,
                    Some(&outcome.output_url),
                )?;
                guard.disarm();
                info!(
                    "Render job {} completed in {:.1}s: {} scenes -> {}",
                    task_id,
                    started.elapsed().as_secs_f64(),
                    outcome.scene_count,
                    outcome.output_url
                );
                Ok(outcome)
            }
            Err(e) => {
                if e.is_interruption() {
                    warn!("Render job {} interrupted: {}", task_id, e);
                } else {
                    error!("Render job {} failed: {}", task_id, e);
                }
                guard.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn render(&self, job: &RenderJob, ctx: &JobContext) -> Result<RenderOutcome> {
        let area = WorkArea::allocate(&self.output_root)?;
        debug!("Job {} work area {}", job.task_id, area.dir().display());

        ctx.check()?;
        let mut scenes = self
            .stages
            .script
            .generate(&job.prompt, ctx)
            .map_err(|e| e.in_stage(Stage::Script))?;
        if scenes.is_empty() {
            return Err(Error::ScriptGeneration("screenplay has no scenes".into()));
        }
        scenes.sort_by_key(|s| s.scene_id);
        info!("Job {} screenplay: {} scenes", job.task_id, scenes.len());

        let face = job.face_reference_image.as_deref();
        let audio_ctx = ctx.child();
        let (clips, tracks) = std::thread::scope(|scope| {
            let audio = scope.spawn(|| self.dialogue_tracks(&scenes, &area, &audio_ctx));
            let visuals = self.visual_tracks(&scenes, face, &area, ctx);
            if visuals.is_err() {
                audio_ctx.cancel();
            }
            let audio = audio
                .join()
                .unwrap_or_else(|_| Err(Error::stage(Stage::Audio, "audio worker panicked")));
            Ok::<_, Error>((visuals?, audio?))
        })?;

        ctx.check()?;
        let stitched = self
            .stages
            .stitcher
            .concat_with_crossfade(&clips, self.crossfade_secs, &area.stitched_path(), ctx)
            .map_err(|e| e.in_stage(Stage::Stitch))?;
        ensure_artifact(&stitched, Stage::Stitch)?;

        let final_path = self
            .stages
            .stitcher
            .mix_audio(&stitched, &tracks, &area.final_path(), ctx)
            .map_err(|e| e.in_stage(Stage::Mix))?;
        ensure_artifact(&final_path, Stage::Mix)?;

        ctx.check()?;
        let output_url = self
            .stages
            .publisher
            .upload(&final_path, &area.publish_key(), ctx)
            .map_err(|e| e.in_stage(Stage::Publish))?;

        Ok(RenderOutcome {
            task_id: job.task_id.clone(),
            run_id: area.run_id().to_string(),
            scene_count: scenes.len(),
            output_url,
        })
    }

    /// Keyframe then clip for each scene, in order. Returns the clip paths.
    fn visual_tracks(
        &self,
        scenes: &[Scene],
        face: Option<&str>,
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<Vec<PathBuf>> {
        let mut clips = Vec::with_capacity(scenes.len());
        for scene in scenes {
            ctx.check()?;
            let keyframe = self
                .stages
                .keyframe
                .generate(scene, face, area, ctx)
                .map_err(|e| e.in_stage(Stage::Keyframe))?;
            ensure_artifact(&keyframe, Stage::Keyframe)?;

            let clip = self
                .stages
                .clip
                .generate(scene, &keyframe, area, ctx)
                .map_err(|e| e.in_stage(Stage::Clip))?;
            ensure_artifact(&clip, Stage::Clip)?;

            debug!("Scene {} visuals ready", scene.scene_id);
            clips.push(clip);
        }
        Ok(clips)
    }

    /// Dialogue audio for each scene, in order.
    fn dialogue_tracks(
        &self,
        scenes: &[Scene],
        area: &WorkArea,
        ctx: &JobContext,
    ) -> Result<Vec<PathBuf>> {
        let mut tracks = Vec::with_capacity(scenes.len());
        for scene in scenes {
            ctx.check()?;
            let track = self
                .stages
                .audio
                .generate(scene, area, ctx)
                .map_err(|e| e.in_stage(Stage::Audio))?;
            ensure_artifact(&track, Stage::Audio)?;
            tracks.push(track);
        }
        Ok(tracks)
    }
}

fn ensure_artifact(path: &Path, stage: Stage) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::stage(stage, format!("{} is empty", path.display()))),
        Err(_) => Err(Error::stage(stage, format!("{} was not produced", path.display()))),
    }
}
