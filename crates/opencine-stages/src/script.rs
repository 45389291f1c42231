//! Screenplay stage: prompt → ordered scenes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use opencine_core::{Error, JobContext, ModelConfig, Result, Scene};

const SYSTEM_PROMPT: &str = "Return ONLY valid JSON. Output a list of scenes with fields \
scene_id, visual_prompt, dialogue, shot_type (wide|medium|close-up).";

const MAX_NEW_TOKENS: u32 = 1200;
const TEMPERATURE: f32 = 0.3;

/// Turns a user prompt into a screenplay.
pub trait ScriptWriter: Send + Sync {
    fn generate(&self, prompt: &str, ctx: &JobContext) -> Result<Vec<Scene>>;
}

/// Raw text completion backend.
pub trait TextGenerator: Send + Sync {
    fn complete(&self, prompt: &str, ctx: &JobContext) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Text generation over HTTP: `POST url {model, prompt, ...}` → `{text}`.
///
/// Serves both an external LLM API and the model server's `/text` endpoint.
pub struct HttpTextGenerator {
    http: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }

    /// External API when configured, otherwise the model server.
    pub fn from_config(models: &ModelConfig) -> Result<Self> {
        match &models.llm_api_url {
            Some(url) => {
                info!("Screenplays via external LLM endpoint {}", url);
                Self::new(url.clone(), models.llm_model_id.clone(), models.llm_api_key.clone())
            }
            None => Self::new(
                format!("{}/text", models.model_server_url.trim_end_matches('/')),
                models.llm_model_id.clone(),
                None,
            ),
        }
    }
}

impl TextGenerator for HttpTextGenerator {
    fn complete(&self, prompt: &str, ctx: &JobContext) -> Result<String> {
        ctx.check()?;
        let mut request = self.http.post(&self.url).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "max_new_tokens": MAX_NEW_TOKENS,
            "temperature": TEMPERATURE,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(remaining) = ctx.remaining() {
            request = request.timeout(remaining);
        }

        let response = request
            .send()
            .map_err(|e| Error::Http(format!("text generation request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Http(format!("text generation returned {}: {}", status, body)));
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| Error::Http(format!("unreadable text generation response: {}", e)))?;
        if let Some(err) = parsed.error {
            return Err(Error::Http(format!("text generation failed: {}", err)));
        }
        Ok(parsed.text.unwrap_or_else(|| "[]".to_string()))
    }
}

/// Screenplay writer backed by a text generator.
pub struct ScriptDirector {
    generator: Arc<dyn TextGenerator>,
}

impl ScriptDirector {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

impl ScriptWriter for ScriptDirector {
    fn generate(&self, prompt: &str, ctx: &JobContext) -> Result<Vec<Scene>> {
        info!("Generating screenplay for prompt length={}", prompt.chars().count());
        let request = format!("{}\n\nUser request: {}", SYSTEM_PROMPT, prompt);
        let raw = self.generator.complete(&request, ctx)?;
        let scenes = parse_screenplay(&raw)?;
        info!("Generated {} screenplay scenes", scenes.len());
        Ok(scenes)
    }
}

/// Extract the scene list from free-form model output.
///
/// Takes everything from the first `[` to the last `]`, so chatty preambles
/// and trailing notes are tolerated. Scene order is preserved as written.
pub fn parse_screenplay(raw: &str) -> Result<Vec<Scene>> {
    let (start, end) = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(Error::ScriptGeneration(
                "no JSON scene list in model output".into(),
            ))
        }
    };
    let candidate = &raw[start..=end];
    debug!("Screenplay candidate: {} bytes", candidate.len());

    let scenes: Vec<Scene> = serde_json::from_str(candidate)
        .map_err(|e| Error::ScriptGeneration(format!("malformed scene list: {}", e)))?;
    if scenes.is_empty() {
        return Err(Error::ScriptGeneration("screenplay has no scenes".into()));
    }

    let mut seen = HashSet::new();
    for scene in &scenes {
        if !seen.insert(scene.scene_id) {
            return Err(Error::ScriptGeneration(format!(
                "duplicate scene_id {}",
                scene.scene_id
            )));
        }
    }

    Ok(scenes)
}
