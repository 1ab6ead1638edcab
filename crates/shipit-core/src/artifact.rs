//! Artifact storage abstraction.
//!
//! Matrix cells upload their binaries under a unique name; the aggregator
//! downloads them back by name. Artifacts are write-once.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{ResourceId, Result};

/// Key for storing/retrieving an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Pipeline run that produced the artifact.
    pub run_id: ResourceId,
    /// Artifact name, e.g. `opsops-linux-x86_64`.
    pub name: String,
}

impl ArtifactKey {
    pub fn new(run_id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            run_id,
            name: name.into(),
        }
    }
}

/// Reference to a stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    /// Storage location (backend-specific).
    pub location: String,
    /// Hex sha256 of the content.
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// A binary produced by one matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Platform identifier, e.g. `macos-aarch64`.
    pub platform: String,
    /// Artifact and release asset name.
    pub name: String,
    /// Local path of the binary.
    pub path: PathBuf,
    pub size: u64,
    /// Hex sha256 of the binary.
    pub sha256: String,
}

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact. Storing the same key twice is an error.
    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef>;

    /// Retrieve an artifact by key.
    async fn get(&self, key: &ArtifactKey) -> Result<Bytes>;

    /// List artifacts for a pipeline run, sorted by name.
    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>>;

    /// Delete an artifact.
    async fn delete(&self, key: &ArtifactKey) -> Result<()>;
}
