//! Shared configuration, error taxonomy, and workflow-graph utilities
//! for the ComfyUI serverless worker.

pub mod config;
pub mod error;
pub mod workflow;
