//! Version, release notes and propagation commands.

use super::{Context, require_host};
use anyhow::{Context as _, Result};
use semver::Version;

/// Print what the version stage would decide for the unreleased commits.
pub async fn version(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let repo = ctx.snapshot(&config).await?;
    let tag_prefix = config.tag_prefix.clone();
    let orchestrator = ctx.orchestrator(config, None)?;
    let decision = orchestrator.resolve_version(&repo);

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    println!(
        "Previous: {}",
        repo.previous_tag.as_deref().unwrap_or("(none)")
    );
    println!("Commits:  {}", repo.commits.len());
    for commit in &repo.commits {
        println!("  {} {}", commit.short_hash(), commit.subject);
    }
    println!("Bump:     {}", decision.bump_level);
    if decision.should_release {
        println!("Next:     {}", decision.tag(&tag_prefix));
    } else {
        println!("Next:     no release warranted");
    }
    Ok(())
}

/// Print the release notes the next release would carry.
pub async fn notes(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let repo = ctx.snapshot(&config).await?;
    let orchestrator = ctx.orchestrator(config, None)?;
    let decision = orchestrator.resolve_version(&repo);
    print!("{}", orchestrator.notes_for(&repo, &decision));
    Ok(())
}

/// Re-run the downstream updates for a published version.
pub async fn propagate(ctx: &Context, version: &Version) -> Result<()> {
    let config = ctx.load_config()?;
    require_host(&config, ctx)?;
    let orchestrator = ctx.orchestrator(config, None)?;

    let release = orchestrator
        .propagate_release(version)
        .await
        .with_context(|| format!("Failed to propagate {}", version))?;

    println!("Propagated {}", release.tag);
    for asset in &release.assets {
        println!("  {}  {}", asset.sha256, asset.name);
    }
    Ok(())
}
