//! Pipeline execution commands.

use super::{Context, require_host};
use anyhow::{Context as _, Result};
use shipit_config::VariableContext;
use shipit_core::executor::LogStream;
use shipit_core::pipeline::{Pipeline, Stage, StageKind, TriggerEvent};
use shipit_scheduler::{PipelineEvent, PipelineOrchestrator, PipelineResult, RepoSnapshot, StageState};

/// Run the stages selected for a trigger event.
pub async fn run(ctx: &Context, event: &str, branch: &str, base: Option<&str>) -> Result<()> {
    let config = ctx.load_config()?;
    let event = TriggerEvent::from_parts(event, branch, base).context("Invalid trigger event")?;
    let pipeline = Pipeline::for_event(config.project.clone(), event, &config.main_branch);

    let repo = if pipeline.has_stage(StageKind::Version) {
        require_host(&config, ctx)?;
        ctx.snapshot(&config).await?
    } else {
        RepoSnapshot::default()
    };

    println!(
        "Running pipeline: {} ({})",
        pipeline.name,
        pipeline.event.kind()
    );
    let orchestrator = ctx.orchestrator(config, None)?;
    execute(ctx, &orchestrator, &pipeline, repo).await
}

/// Run the validation checks only.
pub async fn validate(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let pipeline = Pipeline {
        name: config.project.clone(),
        event: TriggerEvent::Push {
            branch: config.main_branch.clone(),
        },
        stages: vec![Stage::new(StageKind::Validate, &[])],
    };
    let orchestrator = ctx.orchestrator(config, None)?;
    execute(ctx, &orchestrator, &pipeline, RepoSnapshot::default()).await
}

/// Build the matrix, or the single cell for `platform`.
pub async fn build(ctx: &Context, platform: Option<String>) -> Result<()> {
    let config = ctx.load_config()?;
    let mut stages = vec![Stage::new(StageKind::Build, &[])];
    // Aggregation needs every cell.
    if platform.is_none() {
        stages.push(Stage::new(StageKind::Aggregate, &[StageKind::Build]));
    }
    let pipeline = Pipeline {
        name: config.project.clone(),
        event: TriggerEvent::Push {
            branch: config.main_branch.clone(),
        },
        stages,
    };
    let orchestrator = ctx.orchestrator(config, platform)?;
    let result = execute(ctx, &orchestrator, &pipeline, RepoSnapshot::default()).await;

    if result.is_ok() {
        println!(
            "Binaries are in {}",
            orchestrator.settings().work_dir.join("dist").display()
        );
    }
    result
}

/// Execute `pipeline`, printing events as they arrive.
async fn execute(
    ctx: &Context,
    orchestrator: &PipelineOrchestrator,
    pipeline: &Pipeline,
    repo: RepoSnapshot,
) -> Result<()> {
    let masker = ctx.masker();
    let (mut rx, result_handle) = orchestrator.execute(pipeline, repo);

    while let Some(event) = rx.recv().await {
        render_event(&masker, event);
    }

    let result = result_handle
        .await
        .context("Pipeline execution task failed")?;
    print_summary(&masker, &result);

    if result.success {
        println!("\n✓ Pipeline succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Pipeline failed");
    }
}

fn render_event(masker: &VariableContext, event: PipelineEvent) {
    match event {
        PipelineEvent::StageStarted { stage } => {
            println!("▶ Stage '{}' started", stage);
        }
        PipelineEvent::StageLog { job, line, .. } => {
            let stream_marker = match line.stream {
                LogStream::Stdout => " ",
                LogStream::Stderr => "!",
                LogStream::System => "*",
            };
            println!("  [{}]{} {}", job, stream_marker, masker.mask(&line.content));
        }
        PipelineEvent::CellCompleted { platform, success } => {
            let mark = if success { "✓" } else { "✗" };
            println!("  {} cell {}", mark, platform);
        }
        PipelineEvent::StageCompleted { stage, success } => {
            if success {
                println!("✓ Stage '{}' completed successfully\n", stage);
            } else {
                println!("✗ Stage '{}' failed\n", stage);
            }
        }
        PipelineEvent::PipelineCompleted { success } => {
            if success {
                println!("--- Pipeline completed successfully ---");
            } else {
                println!("--- Pipeline failed ---");
            }
        }
    }
}

fn print_summary(masker: &VariableContext, result: &PipelineResult) {
    println!("\n--- Stage Summary ---");
    let mut stages: Vec<_> = result.stage_states.iter().collect();
    stages.sort_by_key(|(name, _)| stage_rank(name));
    for (stage_name, state) in stages {
        let status = match state {
            StageState::Succeeded => "✓ succeeded".to_string(),
            StageState::Failed { message } => format!("✗ failed: {}", masker.mask(message)),
            StageState::Skipped { reason } => format!("⊘ skipped: {}", reason),
            StageState::Pending => "○ pending".to_string(),
            StageState::Running => "▶ running".to_string(),
        };
        println!("  {} - {}", stage_name, status);
    }

    if let Some(decision) = &result.decision {
        println!(
            "\nVersion: {} -> {} ({})",
            decision
                .previous_version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
            decision.next_version,
            decision.bump_level
        );
    }
    if let Some(release) = &result.release {
        println!("Release: {} {}", release.tag, release.html_url);
        for asset in &release.assets {
            println!("  {}  {}", asset.sha256, asset.name);
        }
    }
}

fn stage_rank(name: &str) -> usize {
    [
        StageKind::Validate,
        StageKind::Build,
        StageKind::Aggregate,
        StageKind::Version,
        StageKind::Publish,
        StageKind::Propagate,
    ]
    .iter()
    .position(|k| k.to_string() == name)
    .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_rank_follows_release_chain() {
        let mut names = vec!["publish", "validate", "propagate", "build"];
        names.sort_by_key(|n| stage_rank(n));
        assert_eq!(names, vec!["validate", "build", "publish", "propagate"]);
    }
}
