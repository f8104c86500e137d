use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpw_comfyui::supervisor::ComfyUISupervisor;
use rpw_core::config::WorkerConfig;
use rpw_storage::StorageClient;
use rpw_worker::routes;
use rpw_worker::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpw_worker=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        comfyui = %config.comfyui.api_url(),
        "Loaded worker configuration",
    );

    // --- Storage backends (resolved once per process) ---
    let storage = StorageClient::from_config(&config.storage).await;
    match storage.primary_kind() {
        Some(kind) => tracing::info!(storage = %kind, "Primary storage backend selected"),
        None => tracing::warn!("No storage backend configured, jobs will fail to persist"),
    }

    // --- ComfyUI supervisor (the server starts lazily on the first job) ---
    let supervisor = ComfyUISupervisor::new(config.comfyui.clone());

    // --- App state & router ---
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, supervisor, storage);
    let app = routes::app(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {addr}: {e}"));
    tracing::info!(%addr, "Worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Stop the ComfyUI child after the HTTP surface has drained.
    state.supervisor.shutdown().await;
    tracing::info!("Worker shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
