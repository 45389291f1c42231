//! Resources hosted by the external model-serving process.
//!
//! The model server owns the weights; this side only tells it which model to
//! load, which device each model should sit on, and what to render. Render
//! outputs are written by the server to the paths we pass, so both processes
//! must share the work-area filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::manager::MemoryReclaimer;
use crate::resource::{
    ClipRequest, KeyframeModel, KeyframeRequest, Resource, ResourceHandle, ResourceType,
    VideoModel,
};
use opencine_core::{Error, JobContext, ModelConfig, Result};

const DEVICE_ACCELERATOR: &str = "cuda";
const DEVICE_HOST: &str = "cpu";

/// Response envelope returned by every model-server endpoint.
#[derive(Debug, Deserialize)]
struct ServiceResponse {
    status: String,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Blocking HTTP client for the model server.
pub struct ModelServerClient {
    http: Client,
    base_url: String,
}

impl ModelServerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // Loads and renders can take many minutes; per-request deadlines come
        // from the job context instead.
        let http = Client::builder()
            .timeout(Option::<Duration>::None)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str, body: &Value, ctx: Option<&JobContext>) -> Result<ServiceResponse> {
        if let Some(ctx) = ctx {
            ctx.check()?;
        }
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self.http.post(&url).json(body);
        if let Some(remaining) = ctx.and_then(|c| c.remaining()) {
            request = request.timeout(remaining);
        }

        let response = request
            .send()
            .map_err(|e| Error::Http(format!("{} unreachable: {}", url, e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Http(format!("{} returned {}: {}", url, status, body)));
        }

        let parsed: ServiceResponse = response
            .json()
            .map_err(|e| Error::Http(format!("{} sent an unreadable response: {}", url, e)))?;
        match parsed.status.as_str() {
            "success" => Ok(parsed),
            "error" => Err(Error::Http(format!(
                "{} failed: {}",
                url,
                parsed.error.unwrap_or_else(|| "unknown error".into())
            ))),
            other => Err(Error::Http(format!("{} returned unexpected status: {}", url, other))),
        }
    }

    fn load_model(&self, kind: ResourceType, model_id: &str) -> Result<()> {
        info!("Loading {} model {} on model server", kind, model_id);
        self.post(
            "/models/load",
            &json!({ "kind": kind.to_string(), "model_id": model_id }),
            None,
        )
        .map(|_| ())
    }

    fn load_adapter(&self, kind: ResourceType, adapter_id: &str) -> Result<()> {
        self.post(
            &format!("/models/{}/adapters", kind),
            &json!({ "adapter_id": adapter_id }),
            None,
        )
        .map(|_| ())
    }

    fn move_to(&self, kind: ResourceType, device: &str) -> Result<()> {
        self.post(
            &format!("/models/{}/device", kind),
            &json!({ "device": device }),
            None,
        )
        .map(|_| ())
    }

    /// Run a render endpoint and check that the artifact landed where asked.
    fn render(&self, path: &str, body: &Value, output_path: &Path, ctx: &JobContext) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let response = self.post(path, body, Some(ctx))?;
        if let Some(reported) = response.output_path.as_deref() {
            if Path::new(reported) != output_path {
                warn!(
                    "Model server reported {} but {} was requested",
                    reported,
                    output_path.display()
                );
            }
        }
        if !output_path.is_file() {
            return Err(Error::Http(format!(
                "model server reported success but {} does not exist",
                output_path.display()
            )));
        }
        Ok(())
    }
}

/// Asks the model server to empty its device caches.
pub struct ModelServerReclaimer {
    client: Arc<ModelServerClient>,
}

impl ModelServerReclaimer {
    pub fn new(client: Arc<ModelServerClient>) -> Self {
        Self { client }
    }
}

impl MemoryReclaimer for ModelServerReclaimer {
    fn reclaim(&self) -> Result<()> {
        self.client.post("/memory/reclaim", &json!({}), None).map(|_| ())
    }
}

/// Sampling parameters for keyframes.
#[derive(Debug, Clone)]
pub struct KeyframeParams {
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
}

impl Default for KeyframeParams {
    fn default() -> Self {
        Self {
            num_inference_steps: 35,
            guidance_scale: 4.0,
            width: 1024,
            height: 1024,
        }
    }
}

/// Sampling parameters for clips.
#[derive(Debug, Clone)]
pub struct ClipParams {
    pub num_frames: u32,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub fps: u32,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            num_frames: 129,
            width: 1280,
            height: 720,
            num_inference_steps: 40,
            guidance_scale: 6.0,
            fps: 24,
        }
    }
}

/// Keyframe model living on the model server.
pub struct ServedKeyframeModel {
    client: Arc<ModelServerClient>,
    params: KeyframeParams,
    face_conditioning: bool,
}

impl ServedKeyframeModel {
    /// Load the model, then try the face adapter. A missing adapter only
    /// disables face conditioning.
    pub fn load(client: Arc<ModelServerClient>, model_id: &str, face_adapter_id: &str) -> Result<Self> {
        client.load_model(ResourceType::Keyframe, model_id)?;

        let face_conditioning = match client.load_adapter(ResourceType::Keyframe, face_adapter_id) {
            Ok(()) => {
                info!("Loaded face adapter {}", face_adapter_id);
                true
            }
            Err(e) => {
                warn!("Face adapter {} unavailable, continuing without face conditioning: {}", face_adapter_id, e);
                false
            }
        };

        Ok(Self {
            client,
            params: KeyframeParams::default(),
            face_conditioning,
        })
    }
}

impl ResourceHandle for ServedKeyframeModel {
    fn activate(&self) -> Result<()> {
        self.client.move_to(ResourceType::Keyframe, DEVICE_ACCELERATOR)
    }

    fn deactivate(&self) -> Result<()> {
        self.client.move_to(ResourceType::Keyframe, DEVICE_HOST)
    }
}

impl KeyframeModel for ServedKeyframeModel {
    fn supports_face_conditioning(&self) -> bool {
        self.face_conditioning
    }

    fn generate(&self, req: &KeyframeRequest<'_>, ctx: &JobContext) -> Result<()> {
        let mut body = json!({
            "prompt": req.prompt,
            "num_inference_steps": self.params.num_inference_steps,
            "guidance_scale": self.params.guidance_scale,
            "height": self.params.height,
            "width": self.params.width,
            "output_path": req.output_path.to_string_lossy(),
        });
        match req.face_reference {
            Some(face) if self.face_conditioning => {
                body["ip_adapter_image"] = json!(face);
            }
            Some(_) => debug!("Face reference ignored: adapter not loaded"),
            None => {}
        }
        self.client.render("/keyframe", &body, req.output_path, ctx)
    }
}

/// Image-to-video model living on the model server.
pub struct ServedVideoModel {
    client: Arc<ModelServerClient>,
    params: ClipParams,
}

impl ServedVideoModel {
    pub fn load(client: Arc<ModelServerClient>, model_id: &str) -> Result<Self> {
        client.load_model(ResourceType::Video, model_id)?;
        Ok(Self {
            client,
            params: ClipParams::default(),
        })
    }
}

impl ResourceHandle for ServedVideoModel {
    fn activate(&self) -> Result<()> {
        self.client.move_to(ResourceType::Video, DEVICE_ACCELERATOR)
    }

    fn deactivate(&self) -> Result<()> {
        self.client.move_to(ResourceType::Video, DEVICE_HOST)
    }
}

impl VideoModel for ServedVideoModel {
    fn generate(&self, req: &ClipRequest<'_>, ctx: &JobContext) -> Result<()> {
        let body = json!({
            "prompt": req.prompt,
            "image_path": req.keyframe_path.to_string_lossy(),
            "num_frames": self.params.num_frames,
            "height": self.params.height,
            "width": self.params.width,
            "num_inference_steps": self.params.num_inference_steps,
            "guidance_scale": self.params.guidance_scale,
            "fps": self.params.fps,
            "output_path": req.output_path.to_string_lossy(),
        });
        self.client.render("/clip", &body, req.output_path, ctx)
    }
}

/// Factory building the keyframe resource on first acquisition.
pub fn keyframe_factory(
    client: Arc<ModelServerClient>,
    models: &ModelConfig,
) -> impl Fn() -> Result<Resource> + Send + Sync + 'static {
    let model_id = models.keyframe_model_id.clone();
    let adapter_id = models.face_adapter_id.clone();
    move || {
        let model = ServedKeyframeModel::load(client.clone(), &model_id, &adapter_id)?;
        Ok(Resource::Keyframe(Arc::new(model)))
    }
}

/// Factory building the video resource on first acquisition.
pub fn video_factory(
    client: Arc<ModelServerClient>,
    models: &ModelConfig,
) -> impl Fn() -> Result<Resource> + Send + Sync + 'static {
    let model_id = models.video_model_id.clone();
    move || {
        let model = ServedVideoModel::load(client.clone(), &model_id)?;
        Ok(Resource::Video(Arc::new(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const OK: &str = r#"{"status": "success"}"#;

    fn client_for(server: &mockito::Server) -> Arc<ModelServerClient> {
        Arc::new(ModelServerClient::new(&server.url()).unwrap())
    }

    #[test]
    fn test_keyframe_load_with_adapter() {
        let mut server = mockito::Server::new();
        let load = server
            .mock("POST", "/models/load")
            .match_body(Matcher::PartialJson(json!({"kind": "keyframe", "model_id": "flux"})))
            .with_body(OK)
            .create();
        let adapter = server
            .mock("POST", "/models/keyframe/adapters")
            .with_body(OK)
            .create();

        let model = ServedKeyframeModel::load(client_for(&server), "flux", "faceid").unwrap();
        assert!(model.supports_face_conditioning());
        load.assert();
        adapter.assert();
    }

    #[test]
    fn test_keyframe_load_without_adapter() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/models/load").with_body(OK).create();
        server
            .mock("POST", "/models/keyframe/adapters")
            .with_body(r#"{"status": "error", "error": "adapter not found"}"#)
            .create();

        let model = ServedKeyframeModel::load(client_for(&server), "flux", "faceid").unwrap();
        assert!(!model.supports_face_conditioning());
    }

    #[test]
    fn test_load_failure_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/models/load")
            .with_status(500)
            .with_body("CUDA unavailable")
            .create();

        let result = ServedVideoModel::load(client_for(&server), "hunyuan");
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[test]
    fn test_device_moves() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/models/load").with_body(OK).create();
        let to_gpu = server
            .mock("POST", "/models/video/device")
            .match_body(Matcher::Json(json!({"device": "cuda"})))
            .with_body(OK)
            .create();
        let to_cpu = server
            .mock("POST", "/models/video/device")
            .match_body(Matcher::Json(json!({"device": "cpu"})))
            .with_body(OK)
            .create();

        let model = ServedVideoModel::load(client_for(&server), "hunyuan").unwrap();
        model.activate().unwrap();
        model.deactivate().unwrap();
        to_gpu.assert();
        to_cpu.assert();
    }

    #[test]
    fn test_render_requires_output_file() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/models/load").with_body(OK).create();
        server.mock("POST", "/clip").with_body(OK).create();

        let dir = tempfile::TempDir::new().unwrap();
        let keyframe = dir.path().join("scene_001.png");
        let output = dir.path().join("scene_001.mp4");
        let model = ServedVideoModel::load(client_for(&server), "hunyuan").unwrap();

        let req = ClipRequest {
            prompt: "waves",
            keyframe_path: &keyframe,
            output_path: &output,
        };
        let result = model.generate(&req, &JobContext::background());
        assert!(matches!(result, Err(Error::Http(_))));

        std::fs::write(&output, b"clip").unwrap();
        assert!(model.generate(&req, &JobContext::background()).is_ok());
    }

    #[test]
    fn test_face_reference_sent_only_with_adapter() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/models/load").with_body(OK).create();
        server
            .mock("POST", "/models/keyframe/adapters")
            .with_status(404)
            .create();
        let keyframe = server
            .mock("POST", "/keyframe")
            .match_body(Matcher::PartialJson(json!({"prompt": "keeper", "width": 1024})))
            .with_body(OK)
            .create();

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("scene_001.png");
        std::fs::write(&output, b"png").unwrap();

        let model = ServedKeyframeModel::load(client_for(&server), "flux", "faceid").unwrap();
        let req = KeyframeRequest {
            prompt: "keeper",
            face_reference: Some("face.png"),
            output_path: &output,
        };
        model.generate(&req, &JobContext::background()).unwrap();
        keyframe.assert();
    }

    #[test]
    fn test_cancelled_context_skips_request() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/models/load").with_body(OK).create();
        let clip = server.mock("POST", "/clip").expect(0).create();

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("scene_001.mp4");
        let model = ServedVideoModel::load(client_for(&server), "hunyuan").unwrap();
        let ctx = JobContext::background();
        ctx.cancel();

        let req = ClipRequest {
            prompt: "waves",
            keyframe_path: &output,
            output_path: &output,
        };
        assert!(matches!(model.generate(&req, &ctx), Err(Error::Cancelled)));
        clip.assert();
    }
}
