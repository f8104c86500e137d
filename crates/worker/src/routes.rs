//! HTTP surface of the worker: `POST /run` and `GET /health`.
//!
//! `/run` always answers 200 with the job outcome in the body — the
//! serverless platform inspects the payload, not the status code.

use axum::extract::State;
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handler::process_job;
use crate::job::{JobRequest, RunOutcome};
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall worker status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the ComfyUI server currently answers its liveness probe.
    pub comfyui_reachable: bool,
}

/// POST /run -- process one job request.
async fn run_job(State(state): State<AppState>, Json(request): Json<JobRequest>) -> Json<RunOutcome> {
    Json(process_job(&state, request).await)
}

/// GET /health -- worker and ComfyUI liveness.
///
/// A cold container reports `degraded` until the first job has started
/// the server; the worker itself is still healthy.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let comfyui_reachable = state.supervisor.api().system_stats().await.is_ok();

    let status = if comfyui_reachable { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        comfyui_reachable,
    })
}

/// Build the application router with the full middleware stack.
///
/// Used by both `main` and the integration tests so they exercise the
/// same request-id, tracing, and panic-recovery layers.
pub fn app(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/run", post(run_job))
        .route("/health", get(health))
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
