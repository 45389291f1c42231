//! Background render worker: runs queued jobs on blocking threads.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::state::AppState;
use opencine_core::JobContext;
use opencine_runtime::RenderOrchestrator;

/// Start the render worker task.
///
/// At most `worker_slots` jobs render at once. Cancelling `shutdown` stops
/// intake, cancels running jobs through their contexts, and waits for them
/// to record their final status.
pub fn start_render_worker(
    state: Arc<AppState>,
    orchestrator: Arc<RenderOrchestrator>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let mut rx = match state.take_render_rx() {
        Some(rx) => rx,
        None => {
            error!("Render worker already started");
            return None;
        }
    };

    let slots = Arc::new(Semaphore::new(state.config.worker_slots.max(1)));
    let job_timeout = state.config.job_timeout;

    Some(tokio::spawn(async move {
        info!(
            "Render worker started with {} slots",
            state.config.worker_slots
        );
        let mut running = JoinSet::new();

        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let orchestrator = orchestrator.clone();
            let ctx = JobContext::new(shutdown.child_token(), job_timeout);
            debug!("Dispatching render job {}", task.task_id);
            running.spawn_blocking(move || {
                let _permit = permit;
                // Outcome is persisted and logged by the orchestrator.
                let _ = orchestrator.run(&task.task_id, &ctx);
            });

            while let Some(finished) = running.try_join_next() {
                if let Err(e) = finished {
                    error!("Render task panicked: {}", e);
                }
            }
        }

        info!("Render worker stopping, {} jobs still running", running.len());
        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                error!("Render task panicked: {}", e);
            }
        }
        // Blocking HTTP clients inside the stages must not be dropped on an
        // async thread.
        let _ = tokio::task::spawn_blocking(move || drop(orchestrator)).await;
        info!("Render worker stopped");
    }))
}
