//! Pipeline, stage and trigger definitions.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The event a run reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    /// A push to `branch`.
    Push { branch: String },
    /// A pull request, identified by its number and target branch.
    PullRequest { number: Option<u64>, base: String },
}

impl TriggerEvent {
    /// Build an event from CI-style names (`push`, `pull_request`).
    pub fn from_parts(event_name: &str, branch: &str, base: Option<&str>) -> Result<Self> {
        match event_name {
            "push" => Ok(TriggerEvent::Push {
                branch: strip_ref(branch).to_string(),
            }),
            "pull_request" | "pull_request_target" => Ok(TriggerEvent::PullRequest {
                number: pr_number(branch),
                base: strip_ref(base.unwrap_or_default()).to_string(),
            }),
            other => Err(Error::InvalidInput(format!(
                "unsupported trigger event: {}",
                other
            ))),
        }
    }

    /// Whether this event runs the release chain after validation.
    /// Pull requests never do, whatever their branch.
    pub fn releases(&self, main_branch: &str) -> bool {
        match self {
            TriggerEvent::Push { branch } => branch == main_branch,
            TriggerEvent::PullRequest { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
        }
    }
}

fn strip_ref(name: &str) -> &str {
    name.strip_prefix("refs/heads/").unwrap_or(name)
}

// GitHub sets GITHUB_REF_NAME to "<number>/merge" for pull requests.
fn pr_number(ref_name: &str) -> Option<u64> {
    ref_name
        .trim_start_matches("refs/pull/")
        .split('/')
        .next()
        .and_then(|n| n.parse().ok())
}

/// What a stage does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StageKind {
    #[display("validate")]
    Validate,
    #[display("build")]
    Build,
    #[display("aggregate")]
    Aggregate,
    #[display("version")]
    Version,
    #[display("publish")]
    Publish,
    #[display("propagate")]
    Propagate,
}

/// A stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Dependencies (other stage names).
    pub needs: Vec<String>,
    pub kind: StageKind,
}

impl Stage {
    pub fn new(kind: StageKind, needs: &[StageKind]) -> Self {
        Self {
            name: kind.to_string(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            kind,
        }
    }
}

/// The stage graph selected for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub event: TriggerEvent,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Select the stages for `event`: validation always, the release chain
    /// only for pushes to `main_branch`.
    pub fn for_event(name: impl Into<String>, event: TriggerEvent, main_branch: &str) -> Self {
        use StageKind::*;

        let mut stages = vec![Stage::new(Validate, &[])];
        if event.releases(main_branch) {
            stages.extend([
                Stage::new(Build, &[Validate]),
                Stage::new(Aggregate, &[Build]),
                Stage::new(Version, &[Aggregate]),
                Stage::new(Publish, &[Version]),
                Stage::new(Propagate, &[Publish]),
            ]);
        }

        Self {
            name: name.into(),
            event,
            stages,
        }
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind == kind)
    }
}
