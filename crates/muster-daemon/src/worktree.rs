//! Worktree job execution.
//!
//! A job materializes a new git worktree for a branch. Jobs arrive as
//! requests on the job-request channel; each one runs under a
//! per-target lock so concurrent requests for the same branch cannot
//! race. A duplicate is rejected immediately as `skipped`, never
//! queued. The job record is persisted after every state change and
//! output chunk, and every chunk is also broadcast on the job's
//! progress channel, so consumers can follow live or catch up late.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muster_core::keys;
use muster_core::schema::{JobStatus, StoreEvent, WorktreeJob};

use crate::lock::{self, LockHolder};
use crate::store::CoordStore;

/// One incoming request: create a worktree for `target`.
#[derive(Debug, Clone)]
pub struct WorktreeRequest {
    pub target: String,
    pub source_repo: String,
    pub base_ref: Option<String>,
}

/// Builds the process for a job. Swapped out in tests so jobs can run
/// against plain shell commands instead of git.
pub type CommandBuilder = Box<dyn Fn(&WorktreeRequest, &Path) -> Command + Send + Sync>;

fn git_worktree_command(request: &WorktreeRequest, dest: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(&request.source_repo)
        .arg("worktree")
        .arg("add")
        .arg("-b")
        .arg(&request.target)
        .arg(dest);
    if let Some(base) = &request.base_ref {
        cmd.arg(base);
    }
    cmd
}

pub struct JobOrchestrator {
    store: Arc<dyn CoordStore>,
    worktree_root: Option<PathBuf>,
    command_builder: CommandBuilder,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn CoordStore>, worktree_root: Option<PathBuf>) -> Self {
        Self {
            store,
            worktree_root,
            command_builder: Box::new(git_worktree_command),
        }
    }

    #[cfg(test)]
    pub fn with_command_builder(mut self, builder: CommandBuilder) -> Self {
        self.command_builder = builder;
        self
    }

    /// Destination directory for a target branch. Slashes in branch
    /// names become directory separators under the worktree root.
    fn destination(&self, request: &WorktreeRequest) -> PathBuf {
        let root = self.worktree_root.clone().unwrap_or_else(|| {
            let source = Path::new(&request.source_repo);
            source
                .parent()
                .map(|p| p.join("worktrees"))
                .unwrap_or_else(|| PathBuf::from("worktrees"))
        });
        root.join(&request.target)
    }

    /// Run one job to completion, returning its final record. The
    /// per-target lock is released on every exit path; a held lock
    /// short-circuits to `skipped` without waiting.
    pub async fn handle_request(&self, request: WorktreeRequest) -> WorktreeJob {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut job = WorktreeJob::running(
            job_id,
            request.target.clone(),
            request.source_repo.clone(),
            request.base_ref.clone(),
            now,
        );

        let holder = LockHolder::current();
        let guard = match lock::try_acquire(
            &self.store,
            &keys::job_lock_key(&request.target),
            &holder,
            keys::JOB_LOCK_TTL_SECS,
        )
        .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                warn!(target = %request.target, "duplicate worktree job rejected");
                job.status = JobStatus::Skipped;
                job.error = Some(format!(
                    "a worktree job for '{}' is already running",
                    request.target
                ));
                job.completed_at = Some(Utc::now());
                self.persist(&job).await;
                self.announce_status(&job).await;
                return job;
            }
            Err(err) => {
                warn!(target = %request.target, error = %err, "job lock unavailable");
                job.status = JobStatus::Failed;
                job.error = Some(format!("job lock unavailable: {err}"));
                job.completed_at = Some(Utc::now());
                self.persist(&job).await;
                self.announce_status(&job).await;
                return job;
            }
        };

        info!(job_id = %job.job_id, target = %request.target, "worktree job started");
        self.persist(&job).await;
        self.announce_status(&job).await;

        // Keep the per-target lock alive for as long as the job runs;
        // the TTL only covers a crashed holder.
        let renewal_cancel = CancellationToken::new();
        let renewal = guard.spawn_renewal(renewal_cancel.clone());

        let dest = self.destination(&request);
        self.run_job(&mut job, &request, &dest).await;

        renewal_cancel.cancel();
        renewal.abort();

        job.completed_at = Some(Utc::now());
        self.persist(&job).await;
        self.announce_status(&job).await;
        guard.release().await;

        info!(job_id = %job.job_id, status = ?job.status, "worktree job finished");
        job
    }

    async fn run_job(&self, job: &mut WorktreeJob, request: &WorktreeRequest, dest: &Path) {
        let mut cmd = (self.command_builder)(request, dest);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(format!("failed to start worktree command: {err}"));
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
        let mut err_lines = stderr.map(|s| BufReader::new(s).lines());
        let mut stderr_tail: Vec<String> = Vec::new();

        // Drain both pipes as lines arrive, persisting and broadcasting
        // each chunk so progress is visible while the job runs. An
        // exhausted pipe parks forever so the other side keeps driving.
        while out_lines.is_some() || err_lines.is_some() {
            let out_next = async {
                match out_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => std::future::pending().await,
                }
            };
            let err_next = async {
                match err_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                line = out_next => match line {
                    Ok(Some(line)) => self.append_chunk(job, &line).await,
                    _ => out_lines = None,
                },
                line = err_next => match line {
                    Ok(Some(line)) => {
                        stderr_tail.push(line.clone());
                        if stderr_tail.len() > 20 {
                            stderr_tail.remove(0);
                        }
                        self.append_chunk(job, &line).await;
                    }
                    _ => err_lines = None,
                },
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => {
                job.status = JobStatus::Completed;
                job.result_path = Some(dest.to_string_lossy().into_owned());
            }
            Ok(status) => {
                job.status = JobStatus::Failed;
                job.error = Some(if stderr_tail.is_empty() {
                    format!("worktree command exited with {status}")
                } else {
                    stderr_tail.join("\n")
                });
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(format!("failed to wait for worktree command: {err}"));
            }
        }
    }

    async fn append_chunk(&self, job: &mut WorktreeJob, line: &str) {
        if !job.output.is_empty() {
            job.output.push('\n');
        }
        job.output.push_str(line);
        self.persist(job).await;

        let event = StoreEvent::JobProgress {
            job_id: job.job_id.clone(),
            chunk: line.to_string(),
        };
        self.publish(&keys::channels::job_progress(&job.job_id), &event)
            .await;
    }

    async fn announce_status(&self, job: &WorktreeJob) {
        let event = StoreEvent::JobStatusChanged {
            job_id: job.job_id.clone(),
            target: job.target.clone(),
            status: job.status,
        };
        // The global channel is how a requester learns the job id for its
        // target in the first place; the per-job channel serves followers
        // that already have it.
        self.publish(keys::channels::JOBS, &event).await;
        self.publish(&keys::channels::job_progress(&job.job_id), &event)
            .await;
    }

    async fn persist(&self, job: &WorktreeJob) {
        match serde_json::to_string(job) {
            Ok(payload) => {
                if let Err(err) = self
                    .store
                    .set_ex(&keys::job_key(&job.job_id), &payload, keys::JOB_TTL_SECS)
                    .await
                {
                    warn!(job_id = %job.job_id, error = %err, "failed to persist job record");
                }
            }
            Err(err) => warn!(job_id = %job.job_id, error = %err, "failed to encode job record"),
        }
    }

    async fn publish(&self, channel: &str, event: &StoreEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                if let Err(err) = self.store.publish(channel, &payload).await {
                    warn!(channel, error = %err, "failed to publish job event");
                }
            }
            Err(err) => warn!(channel, error = %err, "failed to encode job event"),
        }
    }
}
