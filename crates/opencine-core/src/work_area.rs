//! Per-job scratch directory with deterministic artifact names.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<run_id>/scene_001.png   keyframe
//! <root>/<run_id>/scene_001.mp4   clip
//! <root>/<run_id>/scene_001.wav   dialogue audio
//! <root>/<run_id>/stitched.mp4
//! <root>/<run_id>/final.mp4
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

const RUN_ID_LEN: usize = 10;
const MAX_ALLOCATION_ATTEMPTS: usize = 8;

pub const KEYFRAME_EXT: &str = "png";
pub const CLIP_EXT: &str = "mp4";
pub const AUDIO_EXT: &str = "wav";
pub const FINAL_EXT: &str = "mp4";

/// Scratch directory owned by exactly one render run.
#[derive(Debug, Clone)]
pub struct WorkArea {
    run_id: String,
    dir: PathBuf,
}

impl WorkArea {
    /// Create a fresh, uniquely named work area under `root`.
    ///
    /// The leaf directory is created with `create_dir`, so two runs can never
    /// end up sharing one even if their random ids collide.
    pub fn allocate(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let run_id = new_run_id();
            let dir = root.join(&run_id);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("Allocated work area {}", dir.display());
                    return Ok(Self { run_id, dir });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Internal(format!(
            "could not allocate a unique work area under {}",
            root.display()
        )))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keyframe_path(&self, scene_id: u32) -> PathBuf {
        self.scene_artifact(scene_id, KEYFRAME_EXT)
    }

    pub fn clip_path(&self, scene_id: u32) -> PathBuf {
        self.scene_artifact(scene_id, CLIP_EXT)
    }

    pub fn audio_path(&self, scene_id: u32) -> PathBuf {
        self.scene_artifact(scene_id, AUDIO_EXT)
    }

    pub fn stitched_path(&self) -> PathBuf {
        self.dir.join(format!("stitched.{}", CLIP_EXT))
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join(format!("final.{}", FINAL_EXT))
    }

    /// Object-storage key the final artifact is published under.
    pub fn publish_key(&self) -> String {
        format!("renders/{}/final.{}", self.run_id, FINAL_EXT)
    }

    fn scene_artifact(&self, scene_id: u32, ext: &str) -> PathBuf {
        self.dir.join(format!("scene_{:03}.{}", scene_id, ext))
    }
}

fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(RUN_ID_LEN);
    id
}
