//! Dialogue audio stage.
//!
//! Uses the configured speech engine when it answered its health probe at
//! startup. Otherwise every scene gets a silent track whose length follows
//! the dialogue, so downstream mixing always has a valid WAV to work with.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use opencine_core::{Error, JobContext, Result, Scene, WorkArea};

const SILENCE_SAMPLE_RATE: u32 = 22_050;
const CHARS_PER_SECOND: usize = 12;
const MIN_SILENCE_SECS: usize = 2;
const MAX_SILENCE_SECS: usize = 15;

/// Produces the dialogue track for a scene.
pub trait AudioStage: Send + Sync {
    fn generate(&self, scene: &Scene, area: &WorkArea, ctx: &JobContext) -> Result<PathBuf>;
}

/// Text-to-speech engine writing a WAV file.
pub trait SpeechEngine: Send + Sync {
    fn synthesize(&self, text: &str, output_path: &Path, ctx: &JobContext) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Speech engine behind an HTTP endpoint: `POST /synthesize {text, output_path}`.
pub struct HttpSpeechEngine {
    http: Client,
    base_url: String,
}

impl HttpSpeechEngine {
    /// Connect and verify the engine answers `GET /health`.
    pub fn probe(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let health = http
            .get(format!("{}/health", base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .map_err(|e| Error::Http(format!("speech engine unreachable: {}", e)))?;
        if !health.status().is_success() {
            return Err(Error::Http(format!(
                "speech engine health check returned {}",
                health.status()
            )));
        }

        Ok(Self { http, base_url })
    }
}

impl SpeechEngine for HttpSpeechEngine {
    fn synthesize(&self, text: &str, output_path: &Path, ctx: &JobContext) -> Result<()> {
        ctx.check()?;
        let mut request = self.http.post(format!("{}/synthesize", self.base_url)).json(&json!({
            "text": text,
            "output_path": output_path.to_string_lossy(),
        }));
        if let Some(remaining) = ctx.remaining() {
            request = request.timeout(remaining);
        }

        let response = request
            .send()
            .map_err(|e| Error::Http(format!("speech synthesis request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "speech synthesis returned {}",
                response.status()
            )));
        }
        let parsed: SpeechResponse = response
            .json()
            .map_err(|e| Error::Http(format!("unreadable speech response: {}", e)))?;
        if parsed.status != "success" {
            return Err(Error::Http(format!(
                "speech synthesis failed: {}",
                parsed.error.unwrap_or(parsed.status)
            )));
        }
        if !output_path.exists() {
            return Err(Error::Http(format!(
                "speech engine reported success but {} is missing",
                output_path.display()
            )));
        }
        Ok(())
    }
}

/// Audio stage with a preferred engine and a silent fallback.
pub struct DialogueAudioStage {
    engine: Option<Arc<dyn SpeechEngine>>,
}

impl DialogueAudioStage {
    pub fn new(engine: Option<Arc<dyn SpeechEngine>>) -> Self {
        Self { engine }
    }

    /// Probe the configured engine once; absence or failure means silence.
    pub fn from_url(tts_url: Option<&str>) -> Self {
        let engine = tts_url.and_then(|url| match HttpSpeechEngine::probe(url) {
            Ok(engine) => {
                info!("Speech engine available at {}", url);
                Some(Arc::new(engine) as Arc<dyn SpeechEngine>)
            }
            Err(e) => {
                warn!("Speech engine unavailable, dialogue will be silent: {}", e);
                None
            }
        });
        Self::new(engine)
    }

    pub fn has_speech_engine(&self) -> bool {
        self.engine.is_some()
    }
}

impl AudioStage for DialogueAudioStage {
    fn generate(&self, scene: &Scene, area: &WorkArea, ctx: &JobContext) -> Result<PathBuf> {
        ctx.check()?;
        let output_path = area.audio_path(scene.scene_id);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match &self.engine {
            Some(engine) => engine.synthesize(&scene.dialogue, &output_path, ctx)?,
            None => write_silence(&output_path, silence_duration_secs(&scene.dialogue))?,
        }
        debug!("Audio for scene {} at {}", scene.scene_id, output_path.display());
        Ok(output_path)
    }
}

/// Length of the silent stand-in for `dialogue`, in whole seconds.
pub fn silence_duration_secs(dialogue: &str) -> usize {
    (dialogue.chars().count() / CHARS_PER_SECOND).clamp(MIN_SILENCE_SECS, MAX_SILENCE_SECS)
}

/// Write a mono 16-bit silent WAV.
pub fn write_silence(path: &Path, seconds: usize) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SILENCE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    let samples = seconds * SILENCE_SAMPLE_RATE as usize;
    for _ in 0..samples {
        writer.write_sample(0i16).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(())
}

fn wav_error(e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(io) => Error::Io(io),
        other => Error::Internal(format!("wav encoding failed: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencine_core::ShotType;

    fn scene(dialogue: &str) -> Scene {
        Scene {
            scene_id: 4,
            visual_prompt: "interior".into(),
            dialogue: dialogue.into(),
            shot_type: ShotType::CloseUp,
        }
    }

    #[test]
    fn test_silence_duration_bounds() {
        assert_eq!(silence_duration_secs(""), 2);
        assert_eq!(silence_duration_secs(&"a".repeat(60)), 5);
        assert_eq!(silence_duration_secs(&"a".repeat(1000)), 15);
    }

    #[test]
    fn test_fallback_writes_valid_wav() {
        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::allocate(tmp.path()).unwrap();
        let stage = DialogueAudioStage::new(None);
        assert!(!stage.has_speech_engine());

        let path = stage
            .generate(&scene(&"x".repeat(48)), &area, &JobContext::background())
            .unwrap();
        assert_eq!(path, area.audio_path(4));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, SILENCE_SAMPLE_RATE);
        assert_eq!(reader.duration(), 4 * SILENCE_SAMPLE_RATE);
    }

    #[test]
    fn test_empty_dialogue_still_produces_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::allocate(tmp.path()).unwrap();
        let path = DialogueAudioStage::new(None)
            .generate(&scene(""), &area, &JobContext::background())
            .unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 44);
    }

    #[test]
    fn test_preferred_engine_used_when_present() {
        struct Tone;
        impl SpeechEngine for Tone {
            fn synthesize(&self, text: &str, output_path: &Path, _ctx: &JobContext) -> Result<()> {
                assert_eq!(text, "Ahoy");
                write_silence(output_path, 1)
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::allocate(tmp.path()).unwrap();
        let stage = DialogueAudioStage::new(Some(Arc::new(Tone)));
        let path = stage
            .generate(&scene("Ahoy"), &area, &JobContext::background())
            .unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), SILENCE_SAMPLE_RATE);
    }

    #[test]
    fn test_failed_probe_falls_back_to_silence() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/health").with_status(500).create();

        let stage = DialogueAudioStage::from_url(Some(&server.url()));
        assert!(!stage.has_speech_engine());
        assert!(!DialogueAudioStage::from_url(None).has_speech_engine());
    }

    #[test]
    fn test_http_engine_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("line.wav");
        write_silence(&output, 1).unwrap();

        let mut server = mockito::Server::new();
        server.mock("GET", "/health").with_body("ok").create();
        let synth = server
            .mock("POST", "/synthesize")
            .match_body(mockito::Matcher::PartialJson(json!({"text": "Hello"})))
            .with_body(r#"{"status": "success"}"#)
            .create();

        let engine = HttpSpeechEngine::probe(&server.url()).unwrap();
        engine
            .synthesize("Hello", &output, &JobContext::background())
            .unwrap();
        synth.assert();
    }
}
