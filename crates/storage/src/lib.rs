//! Output artifact persistence.
//!
//! Two backends: an S3-compatible bucket ([`s3::S3Uploader`]) and a
//! network-volume copy ([`volume::VolumeWriter`]).  [`StorageClient`]
//! picks backends once per process from configuration presence and
//! writes to both best-effort per artifact — the dual write is
//! intentional redundancy, not a bug.

pub mod client;
pub mod s3;
pub mod volume;

pub use client::{PersistedArtifact, StorageClient, StorageError, StorageKind};
