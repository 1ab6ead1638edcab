//! Filesystem artifact store.
//!
//! Layout: `<root>/<run id>/<artifact name>`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use shipit_core::artifact::{ArtifactKey, ArtifactRef, ArtifactStore};
use shipit_core::{Error, ResourceId, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &ResourceId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf> {
        if key.name.is_empty()
            || key.name.contains(['/', '\\'])
            || key.name == "."
            || key.name == ".."
        {
            return Err(Error::InvalidInput(format!(
                "invalid artifact name: '{}'",
                key.name
            )));
        }
        Ok(self.run_dir(&key.run_id).join(&key.name))
    }

    async fn describe(&self, key: ArtifactKey, path: &Path) -> Result<ArtifactRef> {
        let data = tokio::fs::read(path).await?;
        let created_at = tokio::fs::metadata(path)
            .await?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ArtifactRef {
            key,
            location: path.display().to_string(),
            checksum: sha256_hex(&data),
            size: data.len() as u64,
            created_at,
        })
    }
}

/// Hex sha256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef> {
        let path = self.path_for(key)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(Error::InvalidInput(format!(
                "artifact '{}' already exists for run {}",
                key.name, key.run_id
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        debug!(artifact = %key.name, size = data.len(), "Stored artifact");

        Ok(ArtifactRef {
            key: key.clone(),
            location: path.display().to_string(),
            checksum: sha256_hex(&data),
            size: data.len() as u64,
            created_at: Utc::now(),
        })
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("artifact '{}'", key.name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>> {
        let dir = self.run_dir(run_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut refs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let key = ArtifactKey::new(*run_id, name);
            refs.push(self.describe(key, &entry.path()).await?);
        }
        refs.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        Ok(refs)
    }

    async fn delete(&self, key: &ArtifactKey) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("artifact '{}'", key.name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
