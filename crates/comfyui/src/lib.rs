//! ComfyUI integration: REST client, process supervision, and the
//! submit/poll job runner.
//!
//! The worker owns a single long-lived ComfyUI child process, reused
//! across jobs.  [`supervisor::ComfyUISupervisor`] starts it and waits
//! for readiness, [`runner::JobRunner`] drives one workflow from
//! submission to a terminal state, and [`models`] wires network-volume
//! models into the server's model directory before first start.

pub mod api;
pub mod history;
pub mod models;
pub mod runner;
pub mod supervisor;
