//! Shared application state.

use std::sync::Arc;

use opencine_core::CineConfig;
use opencine_store::JobStore;
use tokio::sync::mpsc;

/// A queued job handed to the render worker.
#[derive(Debug, Clone)]
pub struct RenderTask {
    pub task_id: String,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: CineConfig,
    pub store: Arc<dyn JobStore>,
    pub render_tx: mpsc::UnboundedSender<RenderTask>,
    render_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<RenderTask>>>,
}

impl AppState {
    pub fn new(config: CineConfig, store: Arc<dyn JobStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            render_tx: tx,
            render_rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Take the render receiver (can only be called once, by the worker).
    pub fn take_render_rx(&self) -> Option<mpsc::UnboundedReceiver<RenderTask>> {
        self.render_rx.lock().take()
    }

    /// Hand a queued job to the worker. Returns false once the worker is gone.
    pub fn dispatch(&self, task_id: &str) -> bool {
        self.render_tx
            .send(RenderTask {
                task_id: task_id.to_string(),
            })
            .is_ok()
    }
}
