//! Hand-off from a due schedule to the execution engine.
//!
//! Triggering writes two rows synchronously (the queued execution, then the
//! advanced schedule timestamps) and pushes the execution onto an unbounded
//! queue. A worker task drains the queue and calls the engine for each entry
//! in its own task. Nothing flows back: there is no backpressure on the tick
//! and engine failures never reach the loop or rewind the schedule.
//! [`Dispatcher::flush`] waits for the hand-offs queued so far, for shutdown
//! and one-shot runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::history::{Execution, NewExecution};
use super::next_run::compute_next_with_limit;
use super::Schedule;
use crate::storage::ScheduleRepository;

/// The external component that actually runs a runbook's steps.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, execution_id: &str) -> Result<()>;
}

/// Calls a remote engine at `POST {endpoint}/executions/{id}/run`.
///
/// No timeout is set on the request; bounding run time is the engine's job.
#[derive(Debug, Clone)]
pub struct HttpExecutionEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExecutionEngine {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpExecutionEngine {
    async fn execute(&self, execution_id: &str) -> Result<()> {
        let url = format!("{}/executions/{}/run", self.endpoint, execution_id);
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach execution engine at {}", url))?
            .error_for_status()
            .context("execution engine rejected the run")?;
        Ok(())
    }
}

/// Used when no engine endpoint is configured: records the hand-off only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyEngine;

#[async_trait]
impl ExecutionEngine for LogOnlyEngine {
    async fn execute(&self, execution_id: &str) -> Result<()> {
        info!(execution_id = %execution_id, "No execution engine configured, leaving execution queued");
        Ok(())
    }
}

enum Job {
    Run(Execution),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Dispatcher {
    repo: Arc<dyn ScheduleRepository>,
    queue: mpsc::UnboundedSender<Job>,
    cron_probe_limit: u32,
}

impl Dispatcher {
    /// Create the dispatcher and spawn its queue worker on the current runtime.
    pub fn spawn(
        repo: Arc<dyn ScheduleRepository>,
        engine: Arc<dyn ExecutionEngine>,
        cron_probe_limit: u32,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(engine, rx));
        Self {
            repo,
            queue,
            cron_probe_limit,
        }
    }

    /// Fire `schedule` at `now`. The schedule is advanced before the engine
    /// is invoked, so a crash in between leaves a queued execution and no
    /// re-fire.
    pub async fn trigger(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<Execution> {
        let execution = self
            .repo
            .create_execution(&NewExecution::scheduled(schedule), now)
            .await
            .context("failed to queue execution")?;

        let next_run_at = compute_next_with_limit(schedule, now, self.cron_probe_limit);
        self.repo
            .update_schedule_timestamps(&schedule.id, now, next_run_at)
            .await
            .context("failed to advance schedule")?;

        info!(
            schedule_id = %schedule.id,
            runbook_id = %schedule.runbook_id,
            execution_id = %execution.id,
            next_run_at = %next_run_at,
            "Scheduled run triggered"
        );

        if self.queue.send(Job::Run(execution.clone())).is_err() {
            error!(execution_id = %execution.id, "Dispatch queue closed, execution left queued");
        }

        Ok(execution)
    }

    /// Wait until every execution queued before this call has been handed to
    /// the engine and the engine call has returned.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.queue.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// [`flush`](Self::flush) bounded by `limit`. Returns `false` and leaves
    /// the remaining hand-offs running if the limit expires.
    pub async fn flush_within(&self, limit: Duration) -> bool {
        if tokio::time::timeout(limit, self.flush()).await.is_ok() {
            return true;
        }
        warn!(
            limit_secs = limit.as_secs(),
            "Execution engine hand-offs still running, giving up on flush"
        );
        false
    }
}

async fn run_queue(engine: Arc<dyn ExecutionEngine>, mut rx: mpsc::UnboundedReceiver<Job>) {
    let tracker = TaskTracker::new();
    while let Some(job) = rx.recv().await {
        match job {
            Job::Run(execution) => {
                tracker.spawn(hand_off(engine.clone(), execution));
            }
            Job::Flush(done) => {
                tracker.close();
                tracker.wait().await;
                tracker.reopen();
                let _ = done.send(());
            }
        }
    }
}

async fn hand_off(engine: Arc<dyn ExecutionEngine>, execution: Execution) {
    match engine.execute(&execution.id).await {
        Ok(()) => info!(execution_id = %execution.id, "Execution handed to engine"),
        Err(e) => error!(
            execution_id = %execution.id,
            runbook_id = %execution.runbook_id,
            "Execution engine failed: {:#}", e
        ),
    }
}
