//! Local process executor implementation.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use shipit_core::executor::*;
use shipit_core::{Error, ResourceId, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

struct LocalJob {
    logs: Option<mpsc::UnboundedReceiver<LogLine>>,
    status: watch::Receiver<JobStatus>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Runs jobs as child processes of the current process.
#[derive(Default, Clone)]
pub struct LocalExecutor {
    jobs: Arc<Mutex<HashMap<ResourceId, LocalJob>>>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(&self, id: &ResourceId, f: impl FnOnce(&mut LocalJob) -> T) -> Result<T> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| Error::Internal("job table lock poisoned".to_string()))?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        Ok(f(job))
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| Error::InvalidInput(format!("job '{}' has no command", spec.name)))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        info!(job = %spec.name, id = %spec.id.short(), "Starting job");
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ExecutionFailed(format!("failed to start '{}': {}", program, e)))?;
        let pid = child.id().map(|p| p.to_string()).unwrap_or_default();

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, LogStream::Stdout, log_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, LogStream::Stderr, log_tx.clone()));
        }

        let started_at = Utc::now();
        let (status_tx, status_rx) = watch::channel(JobStatus::Running { started_at });
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let name = spec.name.clone();
        let timeout = spec.timeout;
        tokio::spawn(async move {
            let outcome = supervise(&mut child, timeout, cancel_rx).await;
            let finished_at = Utc::now();

            let status = match outcome {
                Outcome::Exited(Ok(exit)) if exit.success() => JobStatus::Succeeded {
                    started_at,
                    finished_at,
                },
                Outcome::Exited(Ok(exit)) => JobStatus::Failed {
                    started_at: Some(started_at),
                    finished_at,
                    exit_code: exit.code(),
                    message: if exit.code().is_none() {
                        "terminated by signal".to_string()
                    } else {
                        String::new()
                    },
                },
                Outcome::Exited(Err(e)) => JobStatus::Failed {
                    started_at: Some(started_at),
                    finished_at,
                    exit_code: None,
                    message: e.to_string(),
                },
                Outcome::TimedOut(limit) => {
                    let _ = child.kill().await;
                    let message = format!("timed out after {}s", limit.as_secs());
                    let _ = log_tx.send(system_line(&message));
                    JobStatus::Failed {
                        started_at: Some(started_at),
                        finished_at,
                        exit_code: None,
                        message,
                    }
                }
                Outcome::Cancelled => {
                    let _ = child.kill().await;
                    JobStatus::Cancelled {
                        started_at: Some(started_at),
                        cancelled_at: finished_at,
                    }
                }
            };

            debug!(job = %name, success = status.is_success(), "Job finished");
            let _ = status_tx.send(status);
        });

        self.jobs
            .lock()
            .map_err(|_| Error::Internal("job table lock poisoned".to_string()))?
            .insert(
                spec.id,
                LocalJob {
                    logs: Some(log_rx),
                    status: status_rx,
                    cancel: Some(cancel_tx),
                },
            );

        Ok(JobHandle {
            id: spec.id,
            executor_id: pid,
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
        let rx = self
            .with_job(&handle.id, |job| job.logs.take())?
            .ok_or_else(|| Error::InvalidInput(format!("logs of job {} already taken", handle.id)))?;
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        })))
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.with_job(&handle.id, |job| job.status.borrow().clone())
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobResult> {
        let mut rx = self.with_job(&handle.id, |job| job.status.clone())?;
        let status = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| Error::Internal(format!("job {} supervisor exited", handle.id)))?
            .clone();
        self.jobs
            .lock()
            .map_err(|_| Error::Internal("job table lock poisoned".to_string()))?
            .remove(&handle.id);

        let exit_code = match &status {
            JobStatus::Succeeded { .. } => Some(0),
            JobStatus::Failed { exit_code, .. } => *exit_code,
            _ => None,
        };
        Ok(JobResult { status, exit_code })
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        if let Some(tx) = self.with_job(&handle.id, |job| job.cancel.take())? {
            warn!(id = %handle.id.short(), "Cancelling job");
            let _ = tx.send(());
        }
        Ok(())
    }
}

async fn supervise(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: oneshot::Receiver<()>,
) -> Outcome {
    let deadline = async {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        exit = child.wait() => Outcome::Exited(exit),
        limit = deadline => Outcome::TimedOut(limit),
        _ = cancel => Outcome::Cancelled,
    }
}

async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::UnboundedSender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(content)) => {
                let line = LogLine {
                    timestamp: Utc::now(),
                    stream,
                    content,
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Log stream error");
                break;
            }
        }
    }
}

fn system_line(content: &str) -> LogLine {
    LogLine {
        timestamp: Utc::now(),
        stream: LogStream::System,
        content: content.to_string(),
    }
}
