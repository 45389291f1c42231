//! OpenCine Stages: the per-job production steps.
//!
//! Each stage is a small trait with one production implementation:
//!
//! - `script`: prompt to screenplay via a text generator
//! - `keyframe` / `clip`: accelerator-bound image and video synthesis
//! - `audio`: dialogue tracks, with a silent fallback
//! - `stitcher`: crossfaded concatenation and audio mixing through FFmpeg
//! - `publish`: upload of the finished render

pub mod audio;
pub mod clip;
pub mod keyframe;
pub mod publish;
pub mod script;
pub mod stitcher;

pub use audio::{AudioStage, DialogueAudioStage, HttpSpeechEngine, SpeechEngine};
pub use clip::{AcceleratedClipStage, ClipStage};
pub use keyframe::{AcceleratedKeyframeStage, KeyframeStage};
pub use publish::{LocalBucketPublisher, Publisher};
pub use script::{parse_screenplay, HttpTextGenerator, ScriptDirector, ScriptWriter, TextGenerator};
pub use stitcher::{FfmpegStitcher, Stitcher};

#[cfg(feature = "s3")]
pub use publish::S3Publisher;
