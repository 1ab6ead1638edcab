//! Executor trait and job types.
//!
//! Executors run pipeline commands (format checks, cargo builds) in an isolated
//! working environment and report their logs and exit status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{ResourceId, Result};

/// Specification for a job to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique identifier for this job.
    pub id: ResourceId,
    /// Human readable label (e.g. "lint", "build linux-x86_64").
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Directory to run the command in.
    pub working_dir: Option<PathBuf>,
    /// Environment variables added to the inherited environment.
    pub env: HashMap<String, String>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            command,
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
        }
    }

    /// Build a spec that runs `script` through `sh -c`.
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(
            name,
            vec!["/bin/sh".to_string(), "-c".to_string(), script.into()],
        )
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle to a running or completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: ResourceId,
    /// Executor-specific identifier (e.g. process id).
    pub executor_id: String,
    pub executor_name: String,
}

/// Status of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded { .. })
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
}

impl JobResult {
    /// One-line description of a failed job, for error messages.
    pub fn failure_message(&self) -> Option<String> {
        match &self.status {
            JobStatus::Succeeded { .. } => None,
            JobStatus::Failed {
                exit_code, message, ..
            } => Some(match exit_code {
                Some(code) if message.is_empty() => format!("exited with status {}", code),
                Some(code) => format!("exited with status {}: {}", code, message),
                None => message.clone(),
            }),
            JobStatus::Cancelled { .. } => Some("job was cancelled".to_string()),
            JobStatus::Pending | JobStatus::Running { .. } => {
                Some("job ended in unexpected state".to_string())
            }
        }
    }
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Spawn a new job.
    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Take the log stream of a job. The stream can be taken once.
    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Get the current status of a job.
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus>;

    /// Wait for a job to complete. The executor forgets the job once it
    /// returns; take the logs before waiting.
    async fn wait(&self, handle: &JobHandle) -> Result<JobResult>;

    /// Cancel a running job.
    async fn cancel(&self, handle: &JobHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_spec() {
        let spec = JobSpec::shell("format", "cargo fmt --all -- --check")
            .in_dir("/src")
            .with_env("CI", "true");
        assert_eq!(spec.command[0], "/bin/sh");
        assert_eq!(spec.command[2], "cargo fmt --all -- --check");
        assert_eq!(spec.working_dir, Some(PathBuf::from("/src")));
        assert_eq!(spec.env.get("CI"), Some(&"true".to_string()));
    }

    #[test]
    fn test_failure_message() {
        let failed = JobResult {
            status: JobStatus::Failed {
                started_at: None,
                finished_at: Utc::now(),
                exit_code: Some(101),
                message: String::new(),
            },
            exit_code: Some(101),
        };
        assert_eq!(
            failed.failure_message().as_deref(),
            Some("exited with status 101")
        );

        let ok = JobResult {
            status: JobStatus::Succeeded {
                started_at: Utc::now(),
                finished_at: Utc::now(),
            },
            exit_code: Some(0),
        };
        assert!(ok.failure_message().is_none());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(
            !JobStatus::Running {
                started_at: Utc::now()
            }
            .is_terminal()
        );
        assert!(
            JobStatus::Cancelled {
                started_at: None,
                cancelled_at: Utc::now()
            }
            .is_terminal()
        );
    }
}
