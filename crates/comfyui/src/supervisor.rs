//! Child-process supervision for the vendored ComfyUI server.
//!
//! [`ComfyUISupervisor`] owns the long-lived server process.  It is
//! created once at worker startup and passed explicitly into the job
//! handler, so tests can point it at a stub server instead of a real
//! child process.  [`ComfyUISupervisor::ensure_running`] is called at
//! the start of every job: on a warm container it is a single liveness
//! probe, on a cold one it spawns the server and waits for readiness.
//!
//! There is no restart or backoff policy beyond the startup wait.  If
//! the server dies mid-job, that job's poll loop fails and the next
//! `ensure_running` call respawns it.

use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use rpw_core::config::ComfyUIConfig;

use crate::api::ComfyUIApi;

/// How long `shutdown` waits for the child to exit after the kill signal.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Errors from starting or supervising the ComfyUI process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The child process could not be spawned at all.
    #[error("Failed to spawn ComfyUI process: {0}")]
    Spawn(#[from] std::io::Error),

    /// The child exited before the server became reachable.
    #[error("ComfyUI exited during startup ({status})")]
    Exited { status: std::process::ExitStatus },

    /// The server never answered its liveness endpoint in time.
    #[error("ComfyUI did not become ready within {waited_secs}s")]
    StartupTimeout { waited_secs: u64 },
}

/// Handle to the (possibly not yet started) ComfyUI server process.
pub struct ComfyUISupervisor {
    config: ComfyUIConfig,
    api: ComfyUIApi,
    child: Mutex<Option<Child>>,
}

impl ComfyUISupervisor {
    pub fn new(config: ComfyUIConfig) -> Self {
        let api = ComfyUIApi::new(config.api_url());
        Self {
            config,
            api,
            child: Mutex::new(None),
        }
    }

    /// The API client bound to this server instance.
    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Make sure the server is up, spawning it if necessary.
    ///
    /// Returns once `/system_stats` answers, or with an error when the
    /// child exits during startup or the startup timeout elapses.  The
    /// timeout aborts only this call; an already-spawned child is kept
    /// and picked up again by the next invocation.
    pub async fn ensure_running(&self) -> Result<(), SupervisorError> {
        if self.api.system_stats().await.is_ok() {
            tracing::debug!("ComfyUI already reachable, reusing running server");
            return Ok(());
        }

        let mut child_slot = self.child.lock().await;

        // Discard the handle of a child that has already exited.
        if let Some(child) = child_slot.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    tracing::debug!("ComfyUI process alive but not answering yet");
                }
                Ok(Some(status)) => {
                    tracing::warn!(%status, "ComfyUI process exited, restarting");
                    *child_slot = None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot query ComfyUI process state, restarting");
                    *child_slot = None;
                }
            }
        }

        if child_slot.is_none() {
            *child_slot = Some(self.spawn()?);
        }

        let child = child_slot
            .as_mut()
            .expect("child handle present after spawn");
        self.wait_until_ready(child).await
    }

    /// Kill the child process and wait briefly for it to exit.
    ///
    /// Safe to call when no child was ever spawned.
    pub async fn shutdown(&self) {
        let mut child_slot = self.child.lock().await;
        let Some(mut child) = child_slot.take() else {
            return;
        };

        tracing::info!("Stopping ComfyUI process");
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "Failed to signal ComfyUI process");
        }

        match tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "ComfyUI process stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to reap ComfyUI process"),
            Err(_) => tracing::warn!(
                "ComfyUI process did not exit within {}s",
                SHUTDOWN_WAIT.as_secs()
            ),
        }
    }

    // ---- private helpers ----

    /// Spawn the server child process.
    ///
    /// Stdout/stderr are inherited so the server's own logs land in the
    /// container log stream next to the worker's.
    fn spawn(&self) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg(&self.config.main_script)
            .arg("--listen")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .args(&self.config.extra_args)
            .current_dir(&self.config.working_dir)
            .kill_on_drop(true);

        tracing::info!(
            command = %self.config.command,
            script = %self.config.main_script.display(),
            port = self.config.port,
            "Spawning ComfyUI server",
        );

        Ok(cmd.spawn()?)
    }

    /// Poll the liveness endpoint until the server answers.
    async fn wait_until_ready(&self, child: &mut Child) -> Result<(), SupervisorError> {
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let poll = Duration::from_secs(self.config.startup_poll_interval_secs.max(1));
        let start = Instant::now();

        loop {
            if self.api.system_stats().await.is_ok() {
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "ComfyUI is ready",
                );
                return Ok(());
            }

            // Fail fast if the process died instead of polling out the
            // whole startup window.
            if let Ok(Some(status)) = child.try_wait() {
                return Err(SupervisorError::Exited { status });
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(SupervisorError::StartupTimeout {
                    waited_secs: elapsed.as_secs(),
                });
            }

            tracing::debug!(
                elapsed_secs = elapsed.as_secs(),
                "Waiting for ComfyUI to become ready",
            );
            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    /// Reserve a port that nothing is listening on.
    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Write a shell script into `dir` and return its path.
    ///
    /// The supervisor appends `--listen`/`--port` arguments; a shell
    /// script just ignores its positional parameters.
    fn fake_server_script(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("fake_server.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        path
    }

    fn test_config(dir: &std::path::Path, script: std::path::PathBuf, port: u16) -> ComfyUIConfig {
        ComfyUIConfig {
            host: "127.0.0.1".into(),
            port,
            command: "sh".into(),
            main_script: script,
            working_dir: dir.to_path_buf(),
            output_dir: dir.join("output"),
            extra_args: vec![],
            startup_timeout_secs: 2,
            startup_poll_interval_secs: 1,
            refresh_models: false,
        }
    }

    #[tokio::test]
    async fn unreachable_server_times_out_within_the_startup_window() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), "sleep 30");
        let supervisor = ComfyUISupervisor::new(test_config(dir.path(), script, free_port()));

        let start = Instant::now();
        let result = supervisor.ensure_running().await;

        assert_matches!(result, Err(SupervisorError::StartupTimeout { .. }));
        // Ceiling of 2s plus at most one extra poll interval and probe.
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(6));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn early_child_exit_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), "exit 7");
        let mut config = test_config(dir.path(), script, free_port());
        // Generous window: the exit must cut the wait short.
        config.startup_timeout_secs = 30;
        let supervisor = ComfyUISupervisor::new(config);

        let start = Instant::now();
        let result = supervisor.ensure_running().await;

        assert_matches!(result, Err(SupervisorError::Exited { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn shutdown_without_child_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), "sleep 30");
        let supervisor = ComfyUISupervisor::new(test_config(dir.path(), script, free_port()));
        supervisor.shutdown().await;
    }
}
