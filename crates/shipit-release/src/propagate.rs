//! Downstream propagation.
//!
//! One component serves every downstream target: clone, rewrite the declared
//! file, and commit and push only when the file actually changed.

use crate::git::{GitError, GitService};
use async_trait::async_trait;
use shipit_config::{Committer, VariableContext};
use shipit_core::downstream::DownstreamTarget;
use shipit_core::{Error, Result};
use tracing::{error, info};

/// What a propagation run did to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// A commit was pushed.
    Committed { sha: String },
    /// The file already carried the released values.
    Unchanged,
    /// The file would change, but nothing was committed.
    DryRun { diff_files: Vec<String> },
}

pub struct Propagator {
    git: GitService,
    committer: Committer,
    dry_run: bool,
}

impl Propagator {
    pub fn new(git: GitService, committer: Committer) -> Self {
        Self {
            git,
            committer,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Update one target. A missing anchor fails with [`Error::AnchorNotFound`].
    pub async fn propagate(
        &self,
        target: &DownstreamTarget,
        vars: &VariableContext,
    ) -> Result<PropagationOutcome> {
        let failed = |message: String| Error::PropagationFailed {
            target: target.name.clone(),
            message,
        };

        for sub in &target.substitutions {
            let missing = vars.unresolved(&sub.value);
            if !missing.is_empty() {
                return Err(failed(format!(
                    "unresolved variables in field '{}': {}",
                    sub.name,
                    missing.join(", ")
                )));
            }
        }

        tokio::fs::create_dir_all(self.git.work_dir()).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("shipit-{}-", target.name))
            .tempdir_in(self.git.work_dir())?;
        let clone_dir = scratch.path().join("repo");

        self.git
            .clone_shallow(&target.repository, target.branch.as_deref(), &clone_dir)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let file_path = clone_dir.join(&target.file);
        let content = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|e| failed(format!("cannot read {}: {}", target.file, e)))?;

        let rewritten = target.rewrite(&content, |template| vars.interpolate(template))?;
        if rewritten == content {
            info!(target = %target.name, "Downstream already up to date");
            return Ok(PropagationOutcome::Unchanged);
        }
        tokio::fs::write(&file_path, &rewritten).await?;

        let changed = self
            .git
            .changed_files(&clone_dir)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if changed.is_empty() {
            return Ok(PropagationOutcome::Unchanged);
        }
        if changed.iter().any(|f| f != &target.file) {
            return Err(failed(format!(
                "unexpected changes outside {}: {}",
                target.file,
                changed.join(", ")
            )));
        }

        if self.dry_run {
            info!(target = %target.name, file = %target.file, "Dry run: skipping commit and push");
            return Ok(PropagationOutcome::DryRun {
                diff_files: changed,
            });
        }

        let message = vars.interpolate(&target.message);
        let sha = self
            .git
            .commit_file(&clone_dir, &target.file, &message, &self.committer)
            .await
            .map_err(|e| failed(e.to_string()))?;
        self.git.push(&clone_dir).await.map_err(|e| match e {
            GitError::PushRejected(stderr) => failed(format!("push rejected: {}", stderr)),
            other => failed(other.to_string()),
        })?;

        info!(target = %target.name, sha = %sha, "Pushed downstream update");
        Ok(PropagationOutcome::Committed { sha })
    }
}

/// Something that can bring a downstream target up to date.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn update(
        &self,
        target: &DownstreamTarget,
        vars: &VariableContext,
    ) -> Result<PropagationOutcome>;

    /// Update every target independently. One failure does not stop the others.
    async fn update_all(
        &self,
        targets: &[DownstreamTarget],
        vars: &VariableContext,
    ) -> Vec<(String, Result<PropagationOutcome>)> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self.update(target, vars).await;
            if let Err(e) = &result {
                error!(target = %target.name, error = %e, "Propagation failed");
            }
            results.push((target.name.clone(), result));
        }
        results
    }
}

#[async_trait]
impl Downstream for Propagator {
    async fn update(
        &self,
        target: &DownstreamTarget,
        vars: &VariableContext,
    ) -> Result<PropagationOutcome> {
        self.propagate(target, vars).await
    }
}
