//! Serverless worker binary glue: HTTP surface, job payloads, and the
//! per-job orchestration pipeline.

pub mod handler;
pub mod job;
pub mod routes;
pub mod state;
