//! Per-job orchestration.
//!
//! One job runs strictly sequentially: volume model setup → server
//! readiness → optional seed randomization → submit and poll → collect
//! output files → persist each artifact.  Every failure becomes a
//! structured error in the response; nothing here panics or tears down
//! the long-lived server process.

use rpw_comfyui::models;
use rpw_comfyui::runner::{JobRunner, RunnerError};
use rpw_comfyui::supervisor::SupervisorError;
use rpw_core::error::{JobError, JobErrorKind};
use rpw_core::workflow;

use crate::job::{ArtifactResult, JobRequest, JobResponse, RunOutcome};
use crate::state::AppState;

/// Process one job request end to end.
pub async fn process_job(state: &AppState, request: JobRequest) -> RunOutcome {
    if request.is_heartbeat() {
        tracing::debug!("Heartbeat received");
        return RunOutcome::heartbeat();
    }

    let job_id = request
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let Some(workflow_graph) = request.workflow() else {
        return RunOutcome::failed(
            job_id,
            JobError::new(JobErrorKind::InvalidInput, "no 'workflow' found in input"),
        );
    };

    tracing::info!(
        job_id = %job_id,
        nodes = workflow::node_count(workflow_graph),
        "Processing job",
    );

    // Volume models must be linked before the server first starts, so
    // it finds the weights during its model scan.  Non-fatal.
    let models_linked = link_volume_models(state);

    if let Err(e) = state.supervisor.ensure_running().await {
        return RunOutcome::failed(job_id, startup_error(e));
    }

    if models_linked && state.config.comfyui.refresh_models {
        models::refresh_models(state.supervisor.api()).await;
    }

    let graph = if state.config.job.randomize_seeds {
        let (mutated, replaced) = workflow::randomize_seeds(workflow_graph);
        tracing::debug!(job_id = %job_id, seeds_replaced = replaced, "Randomized seeds");
        mutated
    } else {
        workflow_graph.clone()
    };

    let runner = JobRunner::new(state.supervisor.api(), &state.config.job);
    let completed = match runner.run(&graph).await {
        Ok(completed) => completed,
        Err(e) => return RunOutcome::failed(job_id, runner_error(e)),
    };

    let artifact_paths = completed.collect_artifacts(&state.config.comfyui.output_dir);
    if artifact_paths.is_empty() {
        return RunOutcome::failed(
            job_id,
            JobError::new(JobErrorKind::Execution, "no generated output files found"),
        );
    }

    let images = persist_artifacts(state, &job_id, &artifact_paths).await;
    let total_images = images.iter().filter(|a| a.storage.is_some()).count();

    if total_images == 0 {
        return RunOutcome::failed(
            job_id,
            JobError::new(
                JobErrorKind::Storage,
                format!("none of {} artifacts could be persisted", images.len()),
            ),
        );
    }

    if state.config.job.cleanup_outputs {
        cleanup_local_outputs(&images, &artifact_paths);
    }

    let links: Vec<String> = images.iter().filter_map(|a| a.location()).collect();

    tracing::info!(
        job_id = %job_id,
        prompt_id = %completed.prompt_id,
        total_images,
        "Job completed",
    );

    RunOutcome::Completed(JobResponse {
        id: job_id,
        status: rpw_comfyui::history::JobStatus::Completed,
        prompt_id: completed.prompt_id,
        images,
        links,
        total_images,
        storage: state.storage.primary_kind(),
    })
}

// ---- private helpers ----

/// Link volume models into the server directory, best-effort.
fn link_volume_models(state: &AppState) -> bool {
    let Some(volume_root) = state.storage.volume_root() else {
        return false;
    };

    match models::link_volume_models(volume_root, &state.config.comfyui.working_dir) {
        Ok(report) => !report.populated_subdirs.is_empty(),
        Err(e) => {
            tracing::warn!(error = %e, "Volume model setup skipped");
            false
        }
    }
}

/// Persist every artifact independently; one failure never aborts the rest.
async fn persist_artifacts(
    state: &AppState,
    job_id: &str,
    paths: &[std::path::PathBuf],
) -> Vec<ArtifactResult> {
    let mut images = Vec::with_capacity(paths.len());

    for path in paths {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output")
            .to_string();

        match state.storage.persist(path, job_id).await {
            Ok(artifact) => {
                if state.config.job.debug_log_urls {
                    tracing::info!(
                        job_id,
                        filename = %filename,
                        location = %artifact.location(),
                        "Artifact persisted",
                    );
                }

                // A backend that failed while the other succeeded is
                // reported per-artifact without failing the artifact.
                let error = match (&artifact.upload_error, &artifact.fallback_error) {
                    (Some(e), None) => Some(JobError::new(JobErrorKind::StorageUpload, e)),
                    (None, Some(e)) => Some(JobError::new(JobErrorKind::StorageFallback, e)),
                    _ => None,
                };

                images.push(ArtifactResult {
                    filename,
                    url: artifact.url,
                    path: artifact.volume_path.map(|p| p.display().to_string()),
                    storage: Some(artifact.storage),
                    error,
                });
            }
            Err(e) => {
                images.push(ArtifactResult {
                    filename,
                    url: None,
                    path: None,
                    storage: None,
                    error: Some(JobError::new(JobErrorKind::Storage, e.to_string())),
                });
            }
        }
    }

    images
}

/// Delete local output files that were persisted somewhere.
fn cleanup_local_outputs(images: &[ArtifactResult], paths: &[std::path::PathBuf]) {
    for (artifact, path) in images.iter().zip(paths) {
        if artifact.storage.is_none() {
            continue; // keep files that were not persisted anywhere
        }
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove local output");
        }
    }
}

fn startup_error(e: SupervisorError) -> JobError {
    JobError::new(JobErrorKind::StartupTimeout, e.to_string())
}

fn runner_error(e: RunnerError) -> JobError {
    let kind = match &e {
        RunnerError::Submission(_) => JobErrorKind::Submission,
        RunnerError::PollTimeout { .. } => JobErrorKind::PollTimeout,
        RunnerError::PollTransport { .. } => JobErrorKind::PollTransport,
        RunnerError::Execution(_) => JobErrorKind::Execution,
    };
    JobError::new(kind, e.to_string())
}
