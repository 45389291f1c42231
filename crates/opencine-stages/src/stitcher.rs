//! Clip stitching and audio mixing via FFmpeg.

use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use opencine_core::{Error, JobContext, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_CHARS: usize = 2000;

/// Flags that keep the container and streams free of timestamps and
/// encoder banners, so identical inputs yield identical bytes.
const BITEXACT_FLAGS: &[&str] = &[
    "-fflags",
    "+bitexact",
    "-flags:v",
    "+bitexact",
    "-flags:a",
    "+bitexact",
    "-map_metadata",
    "-1",
];

/// Joins scene clips and lays dialogue under the result.
pub trait Stitcher: Send + Sync {
    /// Concatenate `clips` in order with a crossfade of `transition` seconds
    /// between each adjacent pair.
    fn concat_with_crossfade(
        &self,
        clips: &[PathBuf],
        transition: f64,
        output: &Path,
        ctx: &JobContext,
    ) -> Result<PathBuf>;

    /// Mix `tracks` into one audio stream muxed under `video`.
    ///
    /// With no tracks the video is returned unchanged.
    fn mix_audio(
        &self,
        video: &Path,
        tracks: &[PathBuf],
        output: &Path,
        ctx: &JobContext,
    ) -> Result<PathBuf>;
}

/// Stitcher that shells out to `ffmpeg`/`ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegStitcher {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegStitcher {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check the configured ffmpeg binary runs.
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Container duration of a media file, in seconds.
    pub fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| Error::Internal(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Internal(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<f64>().map_err(|e| {
            Error::Internal(format!(
                "unparsable duration {:?} for {}: {}",
                text.trim(),
                path.display(),
                e
            ))
        })
    }

    fn run(&self, args: &[String], ctx: &JobContext) -> Result<()> {
        ctx.check()?;
        debug!("{} {}", self.ffmpeg, args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-nostdin", "-loglevel", "error"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to start ffmpeg: {}", e)))?;

        // Drained concurrently so a chatty ffmpeg never blocks on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Err(e) = ctx.check() {
                warn!("Stopping ffmpeg: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(Error::Internal(format!(
                "ffmpeg failed with status {}: {}",
                status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }
        Ok(())
    }
}

impl Stitcher for FfmpegStitcher {
    fn concat_with_crossfade(
        &self,
        clips: &[PathBuf],
        transition: f64,
        output: &Path,
        ctx: &JobContext,
    ) -> Result<PathBuf> {
        if clips.is_empty() {
            return Err(Error::Internal("no clips to stitch".into()));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if clips.len() == 1 {
            std::fs::copy(&clips[0], output)?;
            info!("Single clip copied to {}", output.display());
            return Ok(output.to_path_buf());
        }

        let durations = clips
            .iter()
            .map(|clip| self.probe_duration(clip))
            .collect::<Result<Vec<_>>>()?;
        let offsets = crossfade_offsets(&durations, transition)?;

        self.run(&crossfade_args(clips, &offsets, transition, output), ctx)?;
        info!(
            "Stitched {} clips with {:.2}s crossfades into {}",
            clips.len(),
            transition,
            output.display()
        );
        Ok(output.to_path_buf())
    }

    fn mix_audio(
        &self,
        video: &Path,
        tracks: &[PathBuf],
        output: &Path,
        ctx: &JobContext,
    ) -> Result<PathBuf> {
        if tracks.is_empty() {
            return Ok(video.to_path_buf());
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.run(&mix_args(video, tracks, output), ctx)?;
        info!("Mixed {} audio tracks into {}", tracks.len(), output.display());
        Ok(output.to_path_buf())
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((at, _)) => &text[at..],
        None => text,
    }
}

/// Start time of each crossfade, one per adjacent clip pair.
///
/// Transition `k` (joining clip `k-1` to clip `k`) starts at
/// `sum(durations[..k]) - k * transition`. Every clip must be long enough that
/// its incoming and outgoing transitions do not overlap.
pub fn crossfade_offsets(durations: &[f64], transition: f64) -> Result<Vec<f64>> {
    if !transition.is_finite() || transition < 0.0 {
        return Err(Error::Internal(format!(
            "invalid crossfade duration {}",
            transition
        )));
    }

    let last = durations.len().saturating_sub(1);
    for (i, &duration) in durations.iter().enumerate() {
        let fades = if durations.len() == 1 {
            0.0
        } else if i == 0 || i == last {
            1.0
        } else {
            2.0
        };
        if !duration.is_finite() || duration < fades * transition {
            return Err(Error::Internal(format!(
                "clip {} is {:.3}s, too short for {:.3}s crossfades",
                i, duration, transition
            )));
        }
    }

    let mut offsets = Vec::with_capacity(last);
    let mut elapsed = 0.0;
    for (k, duration) in durations.iter().enumerate().take(last) {
        elapsed += duration;
        offsets.push(elapsed - (k + 1) as f64 * transition);
    }
    Ok(offsets)
}

/// FFmpeg arguments chaining `xfade` filters across all clips.
pub fn crossfade_args(
    clips: &[PathBuf],
    offsets: &[f64],
    transition: f64,
    output: &Path,
) -> Vec<String> {
    let mut args = Vec::new();
    for clip in clips {
        args.push("-i".to_string());
        args.push(clip.to_string_lossy().into_owned());
    }

    let mut graph = String::new();
    let mut previous = "[0:v]".to_string();
    for (k, offset) in offsets.iter().enumerate() {
        let label = format!("[v{}]", k + 1);
        if k > 0 {
            graph.push(';');
        }
        let _ = write!(
            graph,
            "{}[{}:v]xfade=transition=fade:duration={:.3}:offset={:.3}{}",
            previous,
            k + 1,
            transition,
            offset,
            label
        );
        previous = label;
    }

    args.extend(["-filter_complex".to_string(), graph]);
    args.extend(["-map".to_string(), previous]);
    args.extend(
        ["-an", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.extend(BITEXACT_FLAGS.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// FFmpeg arguments mixing dialogue tracks under a video stream.
///
/// The mix runs to the longest track and the output is cut at the shorter
/// of video and mix.
pub fn mix_args(video: &Path, tracks: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = vec!["-i".to_string(), video.to_string_lossy().into_owned()];
    for track in tracks {
        args.push("-i".to_string());
        args.push(track.to_string_lossy().into_owned());
    }

    let mut graph = String::new();
    for i in 1..=tracks.len() {
        let _ = write!(graph, "[{}:a]", i);
    }
    let _ = write!(
        graph,
        "amix=inputs={}:duration=longest:dropout_transition=0[aout]",
        tracks.len()
    );

    args.extend(["-filter_complex".to_string(), graph]);
    args.extend(
        [
            "-map", "0:v", "-map", "[aout]", "-c:v", "copy", "-c:a", "aac", "-b:a", "192k",
            "-shortest",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.extend(BITEXACT_FLAGS.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());
    args
}
