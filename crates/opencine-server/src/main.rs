//! OpenCine: prompt-to-film render service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
mod state;
mod worker;

use opencine_accel::{
    keyframe_factory, video_factory, AcceleratorManager, ModelServerClient, ModelServerReclaimer,
    ResourceType,
};
use opencine_core::{CineConfig, PublishBackend};
use opencine_runtime::{RenderOrchestrator, RenderStages};
use opencine_stages::{
    AcceleratedClipStage, AcceleratedKeyframeStage, DialogueAudioStage, FfmpegStitcher,
    HttpTextGenerator, LocalBucketPublisher, Publisher, ScriptDirector,
};
use opencine_store::{JobStore, SqliteJobStore};
use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("OPENCINE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

async fn build_publisher(config: &CineConfig) -> anyhow::Result<Arc<dyn Publisher>> {
    match config.publish.backend {
        PublishBackend::Local => Ok(Arc::new(LocalBucketPublisher::new(
            &config.data_paths.bucket,
            &config.publish.bucket,
        ))),
        #[cfg(feature = "s3")]
        PublishBackend::S3 => Ok(Arc::new(
            opencine_stages::S3Publisher::from_env(&config.publish.bucket, &config.publish.region)
                .await,
        )),
        #[cfg(not(feature = "s3"))]
        PublishBackend::S3 => {
            anyhow::bail!("S3 publishing requires building with the `s3` feature")
        }
    }
}

/// Wire the model server, accelerator manager and stages together.
///
/// Runs on a blocking thread: the HTTP clients here are synchronous and the
/// speech engine is probed during construction.
fn build_orchestrator(
    config: &CineConfig,
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn Publisher>,
) -> opencine_core::Result<RenderOrchestrator> {
    let client = Arc::new(ModelServerClient::new(&config.models.model_server_url)?);
    let manager = Arc::new(
        AcceleratorManager::new().with_reclaimer(Arc::new(ModelServerReclaimer::new(client.clone()))),
    );
    manager.register_factory(
        ResourceType::Keyframe,
        keyframe_factory(client.clone(), &config.models),
    );
    manager.register_factory(ResourceType::Video, video_factory(client, &config.models));

    let stitcher = FfmpegStitcher::new(&config.ffmpeg_bin, &config.ffprobe_bin);
    if !stitcher.is_available() {
        warn!(
            "{} not runnable; stitching will fail until it is installed",
            config.ffmpeg_bin
        );
    }

    let stages = RenderStages {
        script: Arc::new(ScriptDirector::new(Arc::new(HttpTextGenerator::from_config(
            &config.models,
        )?))),
        keyframe: Arc::new(AcceleratedKeyframeStage::new(manager.clone())),
        clip: Arc::new(AcceleratedClipStage::new(manager)),
        audio: Arc::new(DialogueAudioStage::from_url(config.models.tts_url.as_deref())),
        stitcher: Arc::new(stitcher),
        publisher,
    };

    Ok(RenderOrchestrator::new(
        store,
        stages,
        &config.data_paths.outputs,
        config.crossfade_secs,
    ))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    // Initialize configuration
    let config = CineConfig::from_env(&data_dir)?;
    let port = config.port;

    // Initialize store; rows left Processing by a previous run cannot finish
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::open(&config.data_paths.db)
            .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?,
    );
    store.fail_interrupted()?;

    let publisher = build_publisher(&config).await?;
    let orchestrator = {
        let config = config.clone();
        let store = store.clone();
        tokio::task::spawn_blocking(move || build_orchestrator(&config, store, publisher))
            .await
            .context("orchestrator setup panicked")??
    };

    // Build application state and start the render worker
    let state = Arc::new(AppState::new(config, store.clone()));
    let shutdown = CancellationToken::new();
    let worker = worker::start_render_worker(state.clone(), Arc::new(orchestrator), shutdown.clone())
        .context("render worker failed to start")?;

    let pending = store.list_queued()?;
    if !pending.is_empty() {
        info!("Resuming {} queued jobs", pending.len());
        for job in &pending {
            state.dispatch(&job.task_id);
        }
    }

    // Build router
    let app = routes::build_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("OpenCine server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    worker.await?;
    info!("OpenCine server stopped");

    Ok(())
}
