//! Build matrix and artifact aggregation.

use crate::orchestrator::{PipelineEvent, PipelineOrchestrator};
use bytes::Bytes;
use futures::future::join_all;
use shipit_core::artifact::{ArtifactKey, ArtifactRef, BuildArtifact};
use shipit_core::executor::JobSpec;
use shipit_core::pipeline::StageKind;
use shipit_core::platform::TargetDescriptor;
use shipit_core::{Error, ResourceId, Result};
use shipit_executor::sha256_hex;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info};

impl PipelineOrchestrator {
    /// Matrix cells selected for this run.
    pub(crate) fn cells(&self) -> Result<Vec<&TargetDescriptor>> {
        let cells: Vec<&TargetDescriptor> = self
            .config
            .matrix
            .iter()
            .filter(|t| {
                self.settings
                    .only_platform
                    .as_ref()
                    .is_none_or(|p| &t.platform_id() == p)
            })
            .collect();

        if cells.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no matrix target matches platform '{}'",
                self.settings.only_platform.as_deref().unwrap_or_default()
            )));
        }
        Ok(cells)
    }

    /// Cargo target directory of one cell. Cells never share one.
    pub(crate) fn cell_target_dir(&self, target: &TargetDescriptor) -> PathBuf {
        self.settings
            .work_dir
            .join("target")
            .join(target.platform_id())
    }

    /// Build every cell concurrently. All cells run to completion; the stage
    /// fails if any of them failed.
    pub(crate) async fn build_matrix(
        &self,
        run_id: ResourceId,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<()> {
        let cells = self.cells()?;
        info!(cells = cells.len(), "Building matrix");

        let builds = cells.iter().map(|target| async move {
            let platform = target.platform_id();
            let result = self.build_cell(run_id, target, tx).await;
            if let Err(e) = &result {
                error!(platform = %platform, error = %e, "Cell failed");
            }
            let _ = tx
                .send(PipelineEvent::CellCompleted {
                    platform: platform.clone(),
                    success: result.is_ok(),
                })
                .await;
            (platform, result)
        });

        let failed: Vec<String> = join_all(builds)
            .await
            .into_iter()
            .filter(|(_, result)| result.is_err())
            .map(|(platform, _)| platform)
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::BuildFailed { failed })
        }
    }

    async fn build_cell(
        &self,
        run_id: ResourceId,
        target: &TargetDescriptor,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<ArtifactRef> {
        let platform = target.platform_id();
        let target_dir = self.cell_target_dir(target);
        let binary = &self.config.binary;

        let mut command = vec!["cargo".to_string()];
        command.extend(target.cargo_args());
        command.extend(["--bin".to_string(), binary.clone()]);

        let spec = JobSpec::new(format!("build {}", platform), command)
            .in_dir(&self.settings.source_dir)
            .with_env("CARGO_TARGET_DIR", target_dir.display().to_string());

        info!(platform = %platform, runner = ?target.runner, triple = ?target.triple, "Building cell");
        let result = self.run_job(StageKind::Build, spec, tx).await?;
        if let Some(message) = result.failure_message() {
            return Err(Error::ExecutionFailed(format!("{}: {}", platform, message)));
        }

        let output = target.output_path(&target_dir, binary);
        let data = tokio::fs::read(&output).await.map_err(|e| {
            Error::ExecutionFailed(format!(
                "{}: binary not found at {}: {}",
                platform,
                output.display(),
                e
            ))
        })?;

        let key = ArtifactKey::new(run_id, target.artifact_name(&self.config.project));
        let stored = self.artifacts.put(&key, Bytes::from(data)).await?;
        info!(platform = %platform, artifact = %key.name, size = stored.size, "Uploaded artifact");
        Ok(stored)
    }

    /// Collect every expected artifact into one directory, in matrix order.
    pub(crate) async fn aggregate(&self, run_id: ResourceId) -> Result<Vec<BuildArtifact>> {
        let dist = self.settings.work_dir.join("dist").join(run_id.to_string());
        tokio::fs::create_dir_all(&dist).await?;

        let mut collected = Vec::with_capacity(self.config.matrix.len());
        for target in &self.config.matrix {
            let name = target.artifact_name(&self.config.project);
            let data = match self.artifacts.get(&ArtifactKey::new(run_id, &name)).await {
                Ok(data) if !data.is_empty() => data,
                Ok(_) | Err(Error::NotFound(_)) => return Err(Error::MissingArtifact(name)),
                Err(e) => return Err(e),
            };

            let path = dist.join(&name);
            tokio::fs::write(&path, &data).await?;
            make_executable(&path).await?;

            collected.push(BuildArtifact {
                platform: target.platform_id(),
                name,
                path,
                size: data.len() as u64,
                sha256: sha256_hex(&data),
            });
        }

        info!(count = collected.len(), dir = %dist.display(), "Aggregated artifacts");
        Ok(collected)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
