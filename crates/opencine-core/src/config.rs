//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Paths to all OpenCine data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Job database directory (`data/db/`).
    pub db: PathBuf,
    /// Per-run work areas (`data/outputs/`).
    pub outputs: PathBuf,
    /// Local object-storage emulation (`data/bucket/`).
    pub bucket: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            db: root.join("db"),
            outputs: root.join("outputs"),
            bucket: root.join("bucket"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.db)?;
        std::fs::create_dir_all(&self.outputs)?;
        std::fs::create_dir_all(&self.bucket)?;
        Ok(())
    }
}

/// Where finished renders are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishBackend {
    Local,
    S3,
}

/// Model identifiers and endpoints for the external generation services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the model-serving process that hosts keyframe/video models.
    pub model_server_url: String,
    pub keyframe_model_id: String,
    pub face_adapter_id: String,
    pub video_model_id: String,
    pub llm_model_id: String,
    /// External text-generation endpoint; when unset, the model server's
    /// `/text` endpoint is used.
    pub llm_api_url: Option<String>,
    #[serde(skip_serializing)]
    pub llm_api_key: Option<String>,
    /// Preferred speech engine; when unset, audio falls back to silence.
    pub tts_url: Option<String>,
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub backend: PublishBackend,
    pub bucket: String,
    pub region: String,
}

/// Top-level OpenCine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CineConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub models: ModelConfig,
    pub publish: PublishConfig,
    /// Crossfade between consecutive scene clips, in seconds.
    pub crossfade_secs: f64,
    /// Number of jobs rendered concurrently.
    pub worker_slots: usize,
    /// Upper bound on one render run; `None` means unbounded.
    pub job_timeout: Option<Duration>,
    /// Minimum prompt length accepted at intake, in characters.
    pub min_prompt_chars: usize,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl CineConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup(
        data_dir: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let port = parse_var(&var, "PORT")?.unwrap_or(8000);
        let crossfade_secs: f64 = parse_var(&var, "OPENCINE_CROSSFADE_SECS")?.unwrap_or(0.5);
        if !crossfade_secs.is_finite() || crossfade_secs < 0.0 {
            return Err(Error::Config(format!(
                "OPENCINE_CROSSFADE_SECS must be a non-negative number, got {}",
                crossfade_secs
            )));
        }
        let worker_slots: usize = parse_var(&var, "OPENCINE_WORKER_SLOTS")?.unwrap_or(1);
        if worker_slots == 0 {
            return Err(Error::Config("OPENCINE_WORKER_SLOTS must be at least 1".into()));
        }
        let job_timeout = parse_var::<u64>(&var, "OPENCINE_JOB_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        let backend = match var("OPENCINE_PUBLISH_BACKEND").as_deref() {
            None | Some("local") => PublishBackend::Local,
            Some("s3") => PublishBackend::S3,
            Some(other) => {
                return Err(Error::Config(format!("unknown publish backend: {}", other)));
            }
        };

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            models: ModelConfig {
                model_server_url: string_or("OPENCINE_MODEL_SERVER_URL", "http://127.0.0.1:5000"),
                keyframe_model_id: string_or("OPENCINE_KEYFRAME_MODEL", "black-forest-labs/FLUX.1-dev"),
                face_adapter_id: string_or("OPENCINE_FACE_ADAPTER", "h94/IP-Adapter-FaceID"),
                video_model_id: string_or("OPENCINE_VIDEO_MODEL", "tencent/HunyuanVideo-I2V"),
                llm_model_id: string_or("OPENCINE_LLM_MODEL", "meta-llama/Meta-Llama-3.1-70B-Instruct"),
                llm_api_url: var("OPENCINE_LLM_API_URL"),
                llm_api_key: var("OPENCINE_LLM_API_KEY"),
                tts_url: var("OPENCINE_TTS_URL"),
            },
            publish: PublishConfig {
                backend,
                bucket: string_or("OPENCINE_S3_BUCKET", "opencine-renders"),
                region: string_or("OPENCINE_S3_REGION", "us-east-1"),
            },
            crossfade_secs,
            worker_slots,
            job_timeout,
            min_prompt_chars: 10,
            ffmpeg_bin: string_or("OPENCINE_FFMPEG", "ffmpeg"),
            ffprobe_bin: string_or("OPENCINE_FFPROBE", "ffprobe"),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config_with(vars: &[(&str, &str)]) -> (Result<CineConfig>, TempDir) {
        let dir = TempDir::new().unwrap();
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = CineConfig::from_lookup(dir.path(), |k| map.get(k).cloned());
        (config, dir)
    }

    #[test]
    fn test_defaults() {
        let (config, dir) = config_with(&[]);
        let config = config.unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.crossfade_secs, 0.5);
        assert_eq!(config.worker_slots, 1);
        assert!(config.job_timeout.is_none());
        assert_eq!(config.publish.backend, PublishBackend::Local);
        assert_eq!(config.publish.bucket, "opencine-renders");
        assert!(config.models.llm_api_url.is_none());
        assert!(config.data_paths.outputs.starts_with(dir.path()));
        assert!(config.data_paths.db.is_dir());
        assert!(config.data_paths.bucket.is_dir());
    }

    #[test]
    fn test_overrides() {
        let (config, _dir) = config_with(&[
            ("PORT", "9100"),
            ("OPENCINE_CROSSFADE_SECS", "1.25"),
            ("OPENCINE_WORKER_SLOTS", "3"),
            ("OPENCINE_JOB_TIMEOUT_SECS", "600"),
            ("OPENCINE_PUBLISH_BACKEND", "s3"),
            ("OPENCINE_LLM_API_URL", "https://llm.example/v1/generate"),
        ]);
        let config = config.unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.crossfade_secs, 1.25);
        assert_eq!(config.worker_slots, 3);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.publish.backend, PublishBackend::S3);
        assert_eq!(
            config.models.llm_api_url.as_deref(),
            Some("https://llm.example/v1/generate")
        );
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let (config, _dir) = config_with(&[("PORT", "eighty")]);
        assert!(matches!(config, Err(Error::Config(_))));

        let (config, _dir) = config_with(&[("OPENCINE_WORKER_SLOTS", "0")]);
        assert!(matches!(config, Err(Error::Config(_))));

        let (config, _dir) = config_with(&[("OPENCINE_CROSSFADE_SECS", "-1")]);
        assert!(matches!(config, Err(Error::Config(_))));

        let (config, _dir) = config_with(&[("OPENCINE_PUBLISH_BACKEND", "ftp")]);
        assert!(matches!(config, Err(Error::Config(_))));
    }
}
