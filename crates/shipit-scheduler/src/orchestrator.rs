//! Pipeline orchestrator - executes pipeline stages in dependency order.

use crate::graph;
use semver::Version;
use shipit_config::ProjectConfig;
use shipit_core::artifact::{ArtifactStore, BuildArtifact};
use shipit_core::commit::CommitRecord;
use shipit_core::executor::{Executor, JobResult, JobSpec, LogLine};
use shipit_core::pipeline::{Pipeline, Stage, StageKind};
use shipit_core::release::{ReleaseHost, ReleaseRecord};
use shipit_core::version::VersionDecision;
use shipit_core::{Error, ResourceId, Result};
use shipit_release::Downstream;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// State of a stage during execution.
#[derive(Debug, Clone)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
    Skipped { reason: String },
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed { .. } | StageState::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageState::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StageState::Failed { .. })
    }
}

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: String },
    StageLog { stage: String, job: String, line: LogLine },
    CellCompleted { platform: String, success: bool },
    StageCompleted { stage: String, success: bool },
    PipelineCompleted { success: bool },
}

/// Result of a pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: ResourceId,
    /// False when any stage failed. A run that decides not to release succeeds.
    pub success: bool,
    pub stage_states: HashMap<String, StageState>,
    pub artifacts: Vec<BuildArtifact>,
    pub decision: Option<VersionDecision>,
    pub release: Option<ReleaseRecord>,
}

/// Git history the version stage works from.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    /// Commit the release tag will point at.
    pub head_sha: String,
    pub previous_tag: Option<String>,
    pub previous_version: Option<Version>,
    /// Commits since the previous tag, newest first.
    pub commits: Vec<CommitRecord>,
}

/// Where and how a run executes.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Checkout of the project being released.
    pub source_dir: PathBuf,
    /// Scratch space for per-cell target dirs and the aggregated binaries.
    pub work_dir: PathBuf,
    /// Resolve and report everything, change nothing outside `work_dir`.
    pub dry_run: bool,
    /// Build only this platform id.
    pub only_platform: Option<String>,
}

impl RunSettings {
    pub fn new(source_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            work_dir: work_dir.into(),
            dry_run: false,
            only_platform: None,
        }
    }
}

/// Whether later stages should run after a stage succeeds.
pub(crate) enum StageOutcome {
    Continue,
    /// Stop the run successfully, skipping every remaining stage.
    Halt(String),
}

/// Mutable state carried from stage to stage within one run.
#[derive(Default)]
pub(crate) struct RunState {
    pub artifacts: Vec<BuildArtifact>,
    pub decision: Option<VersionDecision>,
    pub release: Option<ReleaseRecord>,
}

/// Orchestrates the execution of a pipeline.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    pub(crate) config: Arc<ProjectConfig>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) host: Option<Arc<dyn ReleaseHost>>,
    pub(crate) downstream: Option<Arc<dyn Downstream>>,
    pub(crate) settings: RunSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Arc<ProjectConfig>,
        executor: Arc<dyn Executor>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: RunSettings,
    ) -> Self {
        Self {
            config,
            executor,
            artifacts,
            host: None,
            downstream: None,
            settings,
        }
    }

    pub fn with_release_host(mut self, host: Arc<dyn ReleaseHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub(crate) fn release_host(&self) -> Result<&Arc<dyn ReleaseHost>> {
        self.host
            .as_ref()
            .ok_or_else(|| Error::Internal("no release host configured".to_string()))
    }

    /// Execute a pipeline, returning a channel of events and a handle to get the final result.
    pub fn execute(
        &self,
        pipeline: &Pipeline,
        repo: RepoSnapshot,
    ) -> (
        mpsc::Receiver<PipelineEvent>,
        tokio::task::JoinHandle<PipelineResult>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let this = self.clone();
        let stages = pipeline.stages.clone();

        let handle = tokio::spawn(async move { this.execute_inner(stages, repo, tx).await });

        (rx, handle)
    }

    async fn execute_inner(
        &self,
        stages: Vec<Stage>,
        repo: RepoSnapshot,
        tx: mpsc::Sender<PipelineEvent>,
    ) -> PipelineResult {
        let run_id = ResourceId::new();
        let mut state = RunState::default();
        let mut stage_states: HashMap<String, StageState> = stages
            .iter()
            .map(|s| (s.name.clone(), StageState::Pending))
            .collect();

        let execution_order = match graph::execution_order(&stages) {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Invalid stage graph");
                for s in stage_states.values_mut() {
                    *s = StageState::Failed { message: e.clone() };
                }
                let _ = tx.send(PipelineEvent::PipelineCompleted { success: false }).await;
                return PipelineResult {
                    run_id,
                    success: false,
                    stage_states,
                    artifacts: Vec::new(),
                    decision: None,
                    release: None,
                };
            }
        };

        info!(run = %run_id.short(), stages = ?execution_order, dry_run = self.settings.dry_run, "Starting pipeline");
        let mut halted: Option<String> = None;

        for stage_name in &execution_order {
            let Some(stage) = stages.iter().find(|s| &s.name == stage_name) else {
                continue;
            };

            if let Some(reason) = &halted {
                info!(stage = %stage.name, reason = %reason, "Skipping stage");
                stage_states.insert(
                    stage.name.clone(),
                    StageState::Skipped {
                        reason: reason.clone(),
                    },
                );
                continue;
            }

            // Check if dependencies are satisfied
            let failed_deps: Vec<&String> = stage
                .needs
                .iter()
                .filter(|dep| {
                    !stage_states
                        .get(*dep)
                        .map(|s| s.is_success())
                        .unwrap_or(false)
                })
                .collect();

            if !failed_deps.is_empty() {
                info!(stage = %stage.name, ?failed_deps, "Skipping stage due to failed dependencies");
                stage_states.insert(
                    stage.name.clone(),
                    StageState::Skipped {
                        reason: format!("Dependencies failed: {:?}", failed_deps),
                    },
                );
                continue;
            }

            let _ = tx
                .send(PipelineEvent::StageStarted {
                    stage: stage.name.clone(),
                })
                .await;
            stage_states.insert(stage.name.clone(), StageState::Running);

            match self
                .execute_stage(stage.kind, run_id, &repo, &mut state, &tx)
                .await
            {
                Ok(outcome) => {
                    info!(stage = %stage.name, "Stage completed successfully");
                    stage_states.insert(stage.name.clone(), StageState::Succeeded);
                    if let StageOutcome::Halt(reason) = outcome {
                        halted = Some(reason);
                    }
                    let _ = tx
                        .send(PipelineEvent::StageCompleted {
                            stage: stage.name.clone(),
                            success: true,
                        })
                        .await;
                }
                Err(e) => {
                    error!(stage = %stage.name, error = %e, "Stage failed");
                    stage_states.insert(
                        stage.name.clone(),
                        StageState::Failed {
                            message: e.to_string(),
                        },
                    );
                    let _ = tx
                        .send(PipelineEvent::StageCompleted {
                            stage: stage.name.clone(),
                            success: false,
                        })
                        .await;
                }
            }
        }

        let success = !stage_states.values().any(|s| s.is_failure());
        info!(run = %run_id.short(), success, "Pipeline finished");
        let _ = tx.send(PipelineEvent::PipelineCompleted { success }).await;

        PipelineResult {
            run_id,
            success,
            stage_states,
            artifacts: state.artifacts,
            decision: state.decision,
            release: state.release,
        }
    }

    async fn execute_stage(
        &self,
        kind: StageKind,
        run_id: ResourceId,
        repo: &RepoSnapshot,
        state: &mut RunState,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<StageOutcome> {
        match kind {
            StageKind::Validate => {
                self.validate(tx).await?;
                Ok(StageOutcome::Continue)
            }
            StageKind::Build => {
                self.build_matrix(run_id, tx).await?;
                Ok(StageOutcome::Continue)
            }
            StageKind::Aggregate => {
                state.artifacts = self.aggregate(run_id).await?;
                Ok(StageOutcome::Continue)
            }
            StageKind::Version => Ok(self.decide_version(repo, state)),
            StageKind::Publish => {
                state.release = Some(self.publish(repo, state).await?);
                Ok(StageOutcome::Continue)
            }
            StageKind::Propagate => {
                let release = state
                    .release
                    .as_ref()
                    .ok_or_else(|| Error::Internal("nothing was published".to_string()))?;
                let previous = state
                    .decision
                    .as_ref()
                    .and_then(|d| d.previous_version.clone());
                self.propagate(release, previous.as_ref()).await?;
                Ok(StageOutcome::Continue)
            }
        }
    }

    /// Run the validation checks in order, stopping at the first failure.
    async fn validate(&self, tx: &mpsc::Sender<PipelineEvent>) -> Result<()> {
        for check in &self.config.checks {
            info!(check = %check.name, command = %check.command, "Running check");
            let spec = JobSpec::shell(&check.name, &check.command).in_dir(&self.settings.source_dir);

            let result = self
                .run_job(StageKind::Validate, spec, tx)
                .await
                .map_err(|e| Error::ValidationFailed {
                    check: check.name.clone(),
                    message: e.to_string(),
                })?;
            if let Some(message) = result.failure_message() {
                return Err(Error::ValidationFailed {
                    check: check.name.clone(),
                    message,
                });
            }
        }
        Ok(())
    }

    /// Spawn a job, forward its logs as events, and wait for it to finish.
    pub(crate) async fn run_job(
        &self,
        stage: StageKind,
        spec: JobSpec,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<JobResult> {
        let job_name = spec.name.clone();
        let handle = self.executor.spawn(spec).await?;
        let log_stream = self.executor.logs(&handle).await?;

        let stage_name = stage.to_string();
        let tx_clone = tx.clone();
        let log_handle = tokio::spawn(async move {
            let mut stream = log_stream;
            while let Some(line) = stream.next().await {
                let _ = tx_clone
                    .send(PipelineEvent::StageLog {
                        stage: stage_name.clone(),
                        job: job_name.clone(),
                        line,
                    })
                    .await;
            }
        });

        let result = self.executor.wait(&handle).await;
        let _ = log_handle.await;
        result
    }
}
