//! Version, publish and propagate stages.

use crate::orchestrator::{PipelineOrchestrator, RepoSnapshot, RunState, StageOutcome};
use semver::Version;
use shipit_config::{ReleaseContext, VariableContext, VariableContextBuilder};
use shipit_core::release::{ReleaseAsset, ReleaseHandle, ReleaseHost, ReleaseRecord, ReleaseSpec};
use shipit_core::version::{VersionDecision, resolve};
use shipit_core::{Error, Result};
use shipit_executor::sha256_hex;
use shipit_release::release_notes;
use std::collections::HashSet;
use tracing::{info, warn};

impl PipelineOrchestrator {
    /// Decide whether `repo`'s unreleased commits warrant a release.
    pub fn resolve_version(&self, repo: &RepoSnapshot) -> VersionDecision {
        resolve(
            repo.previous_version.as_ref(),
            &repo.commits,
            &self.config.rules,
            &self.config.initial_version,
        )
    }

    pub(crate) fn decide_version(&self, repo: &RepoSnapshot, state: &mut RunState) -> StageOutcome {
        let decision = self.resolve_version(repo);
        info!(
            previous = ?repo.previous_version.as_ref().map(|v| v.to_string()),
            commits = repo.commits.len(),
            bump = %decision.bump_level,
            next = %decision.next_version,
            should_release = decision.should_release,
            "Version decided"
        );

        let outcome = if decision.should_release {
            StageOutcome::Continue
        } else {
            StageOutcome::Halt("no release warranted".to_string())
        };
        state.decision = Some(decision);
        outcome
    }

    /// Release notes for the decided version.
    pub fn notes_for(&self, repo: &RepoSnapshot, decision: &VersionDecision) -> String {
        let tag = decision.tag(&self.config.tag_prefix);
        let compare_base = self.host.as_ref().map(|h| h.repository_url());
        release_notes(
            &tag,
            repo.previous_tag.as_deref(),
            &repo.commits,
            compare_base.as_deref(),
        )
    }

    pub(crate) async fn publish(&self, repo: &RepoSnapshot, state: &RunState) -> Result<ReleaseRecord> {
        let decision = state
            .decision
            .as_ref()
            .ok_or_else(|| Error::Internal("version was not decided".to_string()))?;
        let host = self.release_host()?;
        let tag = decision.tag(&self.config.tag_prefix);

        if host.tag_exists(&tag).await? {
            return Err(Error::TagExists(tag));
        }

        let notes = self.notes_for(repo, decision);
        let mut seen = HashSet::new();
        for artifact in &state.artifacts {
            if !seen.insert(artifact.platform.as_str()) {
                return Err(Error::PublishFailed(format!(
                    "duplicate artifact for platform {}",
                    artifact.platform
                )));
            }
        }

        if self.settings.dry_run {
            info!(tag = %tag, assets = state.artifacts.len(), "Dry run: skipping release and uploads");
            let assets = state
                .artifacts
                .iter()
                .map(|a| ReleaseAsset {
                    platform: a.platform.clone(),
                    name: a.name.clone(),
                    size: a.size,
                    sha256: a.sha256.clone(),
                    download_url: host.download_url(&tag, &a.name),
                })
                .collect();
            return Ok(ReleaseRecord {
                html_url: format!("{}/releases/tag/{}", host.repository_url(), tag),
                tag,
                version: decision.next_version.clone(),
                notes,
                assets,
            });
        }

        let draft = host
            .create_release(&ReleaseSpec {
                tag: tag.clone(),
                name: format!("{} {}", self.config.project, tag),
                target_sha: repo.head_sha.clone(),
                notes: notes.clone(),
            })
            .await?;

        let (handle, assets) = match self.fill_and_publish(host.as_ref(), &draft, state).await {
            Ok(published) => published,
            Err(e) => {
                if let Err(cleanup) = host.delete_release(&draft).await {
                    warn!(tag = %tag, error = %cleanup, "Failed to delete draft release");
                }
                return Err(e);
            }
        };

        info!(tag = %tag, url = %handle.html_url, "Published release");
        Ok(ReleaseRecord {
            tag,
            version: decision.next_version.clone(),
            notes,
            html_url: handle.html_url,
            assets,
        })
    }

    /// Upload every artifact to `draft`, then make it public.
    async fn fill_and_publish(
        &self,
        host: &dyn ReleaseHost,
        draft: &ReleaseHandle,
        state: &RunState,
    ) -> Result<(ReleaseHandle, Vec<ReleaseAsset>)> {
        let mut assets = Vec::with_capacity(state.artifacts.len());
        for artifact in &state.artifacts {
            let data = tokio::fs::read(&artifact.path).await?;
            let download_url = host
                .upload_asset(draft, &artifact.name, data.into())
                .await?;
            info!(asset = %artifact.name, sha256 = %artifact.sha256, "Uploaded asset");
            assets.push(ReleaseAsset {
                platform: artifact.platform.clone(),
                name: artifact.name.clone(),
                size: artifact.size,
                sha256: artifact.sha256.clone(),
                download_url,
            });
        }
        let handle = host.publish_release(draft).await?;
        Ok((handle, assets))
    }

    /// Variables available to downstream templates for `release`.
    pub(crate) async fn release_variables(
        &self,
        release: &ReleaseRecord,
        previous: Option<&Version>,
    ) -> Result<VariableContext> {
        let host = self.release_host()?;
        let download = host.download_url(&release.tag, "");

        let mut builder = VariableContextBuilder::new()
            .with_project(&self.config.project)
            .with_release(ReleaseContext {
                version: release.version.to_string(),
                tag: release.tag.clone(),
                previous: previous.map(|v| v.to_string()),
                download: download.trim_end_matches('/').to_string(),
                url: release.html_url.clone(),
            });
        for asset in &release.assets {
            builder = builder.with_hash(&asset.platform, &asset.sha256);
        }
        let mut vars = builder.build();
        vars.populate_env();
        vars.populate_git_from_env();

        let needs_source = self.config.downstream.iter().any(|t| {
            t.substitutions
                .iter()
                .any(|s| s.value.contains("sha256.source") || s.value.contains("sri.source"))
        });
        if needs_source && !self.settings.dry_run {
            let archive = host.source_archive(&release.tag).await?;
            let digest = sha256_hex(&archive);
            info!(tag = %release.tag, sha256 = %digest, "Hashed source archive");
            vars.set_hash("source", digest);
        }
        Ok(vars)
    }

    /// Update every downstream target for `release`. Targets are independent;
    /// the stage fails if any of them failed, and the release stays in place.
    pub(crate) async fn propagate(
        &self,
        release: &ReleaseRecord,
        previous: Option<&Version>,
    ) -> Result<()> {
        let targets = &self.config.downstream;
        if targets.is_empty() {
            info!("No downstream targets configured");
            return Ok(());
        }

        if self.settings.dry_run {
            for target in targets {
                info!(target = %target.name, repository = %target.repository, file = %target.file, "Dry run: skipping downstream update");
            }
            return Ok(());
        }

        let downstream = self
            .downstream
            .as_ref()
            .ok_or_else(|| Error::Internal("no downstream propagator configured".to_string()))?;
        let vars = self.release_variables(release, previous).await?;

        let mut failures = Vec::new();
        for (name, result) in downstream.update_all(targets, &vars).await {
            match result {
                Ok(outcome) => info!(target = %name, ?outcome, "Downstream updated"),
                Err(e) => failures.push((name, e.to_string())),
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        warn!(failed = failures.len(), "Some downstream targets were not updated");
        Err(Error::PropagationFailed {
            target: failures
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            message: failures
                .iter()
                .map(|(n, m)| format!("{}: {}", n, m))
                .collect::<Vec<_>>()
                .join("; "),
        })
    }

    /// Re-run propagation for an already published `version`, hashing the
    /// release's assets as they were uploaded.
    pub async fn propagate_release(&self, version: &Version) -> Result<ReleaseRecord> {
        let host = self.release_host()?;
        let tag = format!("{}{}", self.config.tag_prefix, version);
        if !host.tag_exists(&tag).await? {
            return Err(Error::NotFound(format!("release tag {}", tag)));
        }

        let mut assets = Vec::with_capacity(self.config.matrix.len());
        for target in &self.config.matrix {
            let name = target.artifact_name(&self.config.project);
            let data = host.download_asset(&tag, &name).await?;
            if data.is_empty() {
                return Err(Error::MissingArtifact(name));
            }
            assets.push(ReleaseAsset {
                platform: target.platform_id(),
                download_url: host.download_url(&tag, &name),
                size: data.len() as u64,
                sha256: sha256_hex(&data),
                name,
            });
        }

        let release = ReleaseRecord {
            html_url: format!("{}/releases/tag/{}", host.repository_url(), tag),
            tag,
            version: version.clone(),
            notes: String::new(),
            assets,
        };
        self.propagate(&release, None).await?;
        Ok(release)
    }
}
