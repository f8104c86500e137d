//! Shared application state.

use std::sync::Arc;

use rpw_comfyui::supervisor::ComfyUISupervisor;
use rpw_core::config::WorkerConfig;
use rpw_storage::StorageClient;

/// State threaded through every request handler.
///
/// The supervisor is the explicit handle to the long-lived ComfyUI
/// process; it lives here (not in a global) so tests can substitute a
/// stub server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WorkerConfig>,
    pub supervisor: Arc<ComfyUISupervisor>,
    pub storage: Arc<StorageClient>,
}

impl AppState {
    pub fn new(
        config: WorkerConfig,
        supervisor: ComfyUISupervisor,
        storage: StorageClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            supervisor: Arc::new(supervisor),
            storage: Arc::new(storage),
        }
    }
}
