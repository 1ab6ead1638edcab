//! CLI command implementations.

pub mod release;
pub mod run;

use anyhow::{Context as _, Result};
use shipit_config::{ProjectConfig, VariableContext, VariableContextBuilder, load_project};
use shipit_executor::{LocalArtifactStore, LocalExecutor};
use shipit_release::{GitHubHost, GitService, Propagator};
use shipit_scheduler::{PipelineOrchestrator, RepoSnapshot, RunSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Settings shared by every subcommand.
pub struct Context {
    pub config_path: PathBuf,
    pub source_dir: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub server_url: Option<String>,
    pub dry_run: bool,
    pub json: bool,
}

impl Context {
    pub fn load_config(&self) -> Result<ProjectConfig> {
        load_project(&self.config_path).with_context(|| {
            format!(
                "Failed to load project definition: {}",
                self.config_path.display()
            )
        })
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(GitService::default_work_dir)
    }

    fn source_dir(&self) -> Result<PathBuf> {
        self.source_dir.canonicalize().with_context(|| {
            format!(
                "Failed to resolve source directory: {}",
                self.source_dir.display()
            )
        })
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    fn github(&self, owner: &str, repo: &str, token: &str) -> GitHubHost {
        let host = GitHubHost::new(owner, repo, token);
        match (&self.api_url, &self.server_url) {
            (Some(api), Some(web)) => host.with_base_urls(api, web),
            _ => host,
        }
    }

    pub fn git(&self) -> GitService {
        GitService::new(self.work_dir(), self.token().map(str::to_string))
    }

    /// Variables used only to mask the token in printed output.
    pub fn masker(&self) -> VariableContext {
        let mut builder = VariableContextBuilder::new();
        if let Some(token) = self.token() {
            builder = builder.with_secret("GITHUB_TOKEN", token);
        }
        builder.build()
    }

    /// Release history of the source checkout.
    pub async fn snapshot(&self, config: &ProjectConfig) -> Result<RepoSnapshot> {
        let git = self.git();
        let source = self.source_dir()?;
        let head_sha = git
            .head_sha(&source)
            .await
            .context("Failed to read HEAD")?;
        let latest = git
            .latest_release_tag(&source, &config.tag_prefix)
            .await
            .context("Failed to list release tags")?;
        let previous_tag = latest.as_ref().map(|(tag, _)| tag.clone());
        let commits = git
            .commits_since(&source, previous_tag.as_deref())
            .await
            .context("Failed to read commit history")?;
        info!(head = %head_sha, previous = ?previous_tag, commits = commits.len(), "Read release history");

        Ok(RepoSnapshot {
            head_sha,
            previous_tag,
            previous_version: latest.map(|(_, version)| version),
            commits,
        })
    }

    /// Build an orchestrator. The release host and propagator are attached
    /// only when a token and repository are available.
    pub fn orchestrator(
        &self,
        config: ProjectConfig,
        only_platform: Option<String>,
    ) -> Result<PipelineOrchestrator> {
        let work_dir = self.work_dir();
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create work directory: {}", work_dir.display()))?;

        let mut settings = RunSettings::new(self.source_dir()?, &work_dir);
        settings.dry_run = self.dry_run;
        settings.only_platform = only_platform;

        let host = match (config.repository_parts(), self.token()) {
            (Some((owner, repo)), Some(token)) => Some(Arc::new(self.github(owner, repo, token))),
            _ => None,
        };
        let propagator = Propagator::new(self.git(), config.committer.clone()).dry_run(self.dry_run);

        let mut orchestrator = PipelineOrchestrator::new(
            Arc::new(config),
            Arc::new(LocalExecutor::new()),
            Arc::new(LocalArtifactStore::new(work_dir.join("artifacts"))),
            settings,
        )
        .with_downstream(Arc::new(propagator));
        if let Some(host) = host {
            orchestrator = orchestrator.with_release_host(host);
        }
        Ok(orchestrator)
    }
}

/// Fail early when a stage that needs the release host has none.
pub fn require_host(config: &ProjectConfig, ctx: &Context) -> Result<()> {
    if config.repository_parts().is_none() {
        anyhow::bail!("No `repository \"owner/name\"` in {}", ctx.config_path.display());
    }
    if ctx.token().is_none() {
        anyhow::bail!("A token is required (--token or GITHUB_TOKEN)");
    }
    Ok(())
}

pub fn check_config(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print_config(&config, &ctx.config_path);
    }
    Ok(())
}

fn print_config(config: &ProjectConfig, path: &Path) {
    println!("Configuration is valid: {}", path.display());
    println!("  project:    {} (binary {})", config.project, config.binary);
    println!(
        "  repository: {}",
        config.repository.as_deref().unwrap_or("(not set)")
    );
    println!("  branch:     {}", config.main_branch);
    println!("  tags:       {}<version>", config.tag_prefix);
    println!("  checks:     {}", config.checks.len());
    println!("  artifacts:");
    for name in config.artifact_names() {
        println!("    {}", name);
    }
    for target in &config.downstream {
        println!(
            "  downstream: {} -> {} ({} fields)",
            target.name,
            target.file,
            target.substitutions.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipit_core::release::ReleaseHost;

    fn context(api_url: Option<&str>, server_url: Option<&str>) -> Context {
        Context {
            config_path: PathBuf::from("shipit.kdl"),
            source_dir: PathBuf::from("."),
            work_dir: None,
            token: Some("token".to_string()),
            api_url: api_url.map(str::to_string),
            server_url: server_url.map(str::to_string),
            dry_run: false,
            json: false,
        }
    }

    #[test]
    fn test_github_host_follows_enterprise_urls() {
        let ctx = context(Some("https://ghe.acme.dev/api/v3/"), Some("https://ghe.acme.dev/"));
        let host = ctx.github("acme", "opsops", "token");
        assert_eq!(host.repository_url(), "https://ghe.acme.dev/acme/opsops");
        assert_eq!(
            host.download_url("v1.5.0", "opsops-linux-x86_64"),
            "https://ghe.acme.dev/acme/opsops/releases/download/v1.5.0/opsops-linux-x86_64"
        );

        let public = context(None, None).github("acme", "opsops", "token");
        assert_eq!(public.repository_url(), "https://github.com/acme/opsops");
    }
}
