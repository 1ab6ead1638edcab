//! shipit CLI: runs the release pipeline for a Rust CLI project.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipit")]
#[command(about = "Validate, build, release and propagate a Rust CLI", long_about = None)]
struct Cli {
    /// Project definition
    #[arg(long, global = true, env = "SHIPIT_CONFIG", default_value = "shipit.kdl")]
    config: PathBuf,

    /// Checkout of the project being released
    #[arg(long, global = true, default_value = ".")]
    source_dir: PathBuf,

    /// Scratch directory for builds, artifacts and downstream clones
    #[arg(long, global = true, env = "SHIPIT_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Token for the release host and downstream pushes
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// REST API root of a GitHub Enterprise installation
    #[arg(long, global = true, env = "GITHUB_API_URL", requires = "server_url")]
    api_url: Option<String>,

    /// Web root of a GitHub Enterprise installation
    #[arg(long, global = true, env = "GITHUB_SERVER_URL", requires = "api_url")]
    server_url: Option<String>,

    /// Resolve and print everything without tagging, publishing or pushing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline selected by a trigger event
    Run {
        /// Event name (`push`, `pull_request`)
        #[arg(long, env = "GITHUB_EVENT_NAME")]
        event: String,
        /// Branch that was pushed, or the pull request ref
        #[arg(long, env = "GITHUB_REF_NAME", default_value = "")]
        branch: String,
        /// Target branch of a pull request
        #[arg(long, env = "GITHUB_BASE_REF")]
        base: Option<String>,
    },
    /// Run the validation checks only
    Validate,
    /// Build the matrix, or a single cell
    Build {
        /// Platform id, e.g. `linux-x86_64`
        #[arg(long)]
        platform: Option<String>,
    },
    /// Print the version decision for the unreleased commits
    Version,
    /// Print release notes for the next version
    Notes,
    /// Update downstream repositories for an already published version
    Propagate {
        /// Released version, e.g. `1.5.0`
        #[arg(long)]
        version: semver::Version,
    },
    /// Check the project definition
    CheckConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let ctx = commands::Context {
        config_path: cli.config,
        source_dir: cli.source_dir,
        work_dir: cli.work_dir,
        token: cli.token,
        api_url: cli.api_url,
        server_url: cli.server_url,
        dry_run: cli.dry_run,
        json: cli.json,
    };

    match cli.command {
        Commands::Run {
            event,
            branch,
            base,
        } => {
            commands::run::run(&ctx, &event, &branch, base.as_deref()).await?;
        }
        Commands::Validate => {
            commands::run::validate(&ctx).await?;
        }
        Commands::Build { platform } => {
            commands::run::build(&ctx, platform).await?;
        }
        Commands::Version => {
            commands::release::version(&ctx).await?;
        }
        Commands::Notes => {
            commands::release::notes(&ctx).await?;
        }
        Commands::Propagate { version } => {
            commands::release::propagate(&ctx, &version).await?;
        }
        Commands::CheckConfig => {
            commands::check_config(&ctx)?;
        }
    }

    Ok(())
}
