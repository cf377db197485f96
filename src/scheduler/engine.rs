use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::Dispatcher;
use super::{cron, Clock, Schedule};
use crate::storage::ScheduleRepository;

/// Outcome of one evaluation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub triggered: usize,
    pub failed: usize,
}

/// Decides which active schedules are due and fires them.
#[derive(Clone)]
pub struct SchedulerEngine {
    repo: Arc<dyn ScheduleRepository>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
}

impl SchedulerEngine {
    pub fn new(repo: Arc<dyn ScheduleRepository>, clock: Arc<dyn Clock>, dispatcher: Dispatcher) -> Self {
        Self {
            repo,
            clock,
            dispatcher,
        }
    }

    /// One pass over every active schedule, in list order.
    ///
    /// Only a failure to list schedules aborts the pass. Any error while
    /// handling a single schedule is logged and the pass moves on.
    pub async fn tick(&self) -> Result<TickSummary> {
        let now = self.clock.now();
        let schedules = self
            .repo
            .list_active_schedules()
            .await
            .context("failed to list active schedules")?;

        let mut summary = TickSummary::default();
        for schedule in &schedules {
            summary.evaluated += 1;
            match self.process(schedule, now).await {
                Ok(true) => summary.triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        schedule_id = %schedule.id,
                        runbook_id = %schedule.runbook_id,
                        "Failed to process schedule: {:#}", e
                    );
                }
            }
        }

        debug!(
            evaluated = summary.evaluated,
            triggered = summary.triggered,
            failed = summary.failed,
            "Scheduler tick complete"
        );
        Ok(summary)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    async fn process(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<bool> {
        if !is_due(schedule, now) {
            return Ok(false);
        }
        self.dispatcher.trigger(schedule, now).await?;
        Ok(true)
    }
}

/// Due-ness, checked in order:
/// 1. a planned `next_run_at` that has been reached;
/// 2. a cron expression matching the current minute;
/// 3. with neither planned nor cron, the frequency's threshold elapsed
///    since `last_run_at`.
///
/// A brand-new schedule with none of these is not due. A cron-only firing
/// is only seen during its exact minute; a missed minute is skipped.
pub fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    if !schedule.is_active || schedule.has_ended(now) {
        return false;
    }

    if let Some(next_run_at) = schedule.next_run_at {
        if next_run_at <= now {
            return true;
        }
    }

    if let Some(expr) = schedule.cron_expression.as_deref() {
        // At most one firing per matching minute.
        if schedule.last_run_at.is_some_and(|last| same_minute(last, now)) {
            return false;
        }
        return cron::matches(expr, now);
    }

    if schedule.next_run_at.is_some() {
        return false;
    }

    match (schedule.last_run_at, schedule.frequency.fallback_threshold_minutes()) {
        (Some(last_run_at), Some(threshold)) => (now - last_run_at).num_minutes() >= threshold,
        _ => false,
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.with_second(0).and_then(|a| a.with_nanosecond(0)) == b.with_second(0).and_then(|b| b.with_nanosecond(0))
}

enum LoopState {
    Stopped,
    Running(CancellationToken),
}

/// `Stopped -> Running -> Stopped`. Owns the recurring timer; callers only
/// see `start` and `stop`.
///
/// Passes never overlap, including across a `stop` and `start`: a pass
/// holds `pass_lock` for its whole run and is skipped if its run was
/// cancelled while it waited.
pub struct SchedulerLoop {
    engine: SchedulerEngine,
    period: Duration,
    state: Mutex<LoopState>,
    pass_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SchedulerLoop {
    pub fn new(engine: SchedulerEngine, period: Duration) -> Self {
        Self {
            engine,
            period,
            state: Mutex::new(LoopState::Stopped),
            pass_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), LoopState::Running(_))
    }

    /// Run one pass immediately, then arm the timer. Calling `start` on a
    /// running loop does nothing.
    pub async fn start(&self) {
        let token = {
            let mut state = self.lock_state();
            if matches!(*state, LoopState::Running(_)) {
                debug!("Scheduler loop already running");
                return;
            }
            let token = CancellationToken::new();
            *state = LoopState::Running(token.clone());
            token
        };

        info!(period_secs = self.period.as_secs(), "Scheduler loop started");
        run_pass(&self.engine, &self.pass_lock, &token).await;

        // Stopped while the first pass was running.
        if token.is_cancelled() {
            return;
        }

        let engine = self.engine.clone();
        let pass_lock = self.pass_lock.clone();
        let period = self.period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => run_pass(&engine, &pass_lock, &token).await,
                }
            }
            info!("Scheduler loop stopped");
        });
    }

    /// Disarm the timer. In-flight dispatches are left to finish.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), LoopState::Stopped);
        if let LoopState::Running(token) = previous {
            token.cancel();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SchedulerLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_pass(
    engine: &SchedulerEngine,
    pass_lock: &tokio::sync::Mutex<()>,
    token: &CancellationToken,
) {
    let _pass = pass_lock.lock().await;
    if token.is_cancelled() {
        return;
    }
    if let Err(e) = engine.tick().await {
        error!("Scheduler tick aborted: {:#}", e);
    }
}
