//! Schedule lifecycle: create, patch, delete, pause, resume and queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::info;
use uuid::Uuid;

use super::cron::CronExpr;
use super::next_run::{compute_next_with_limit, next_for, preview};
use super::{Clock, Execution, Frequency, Schedule, SchedulerError};
use crate::storage::ScheduleRepository;

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const MAX_PREVIEW_RUNS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchedule {
    pub runbook_id: String,
    pub name: String,
    pub frequency: Frequency,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub environment: String,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Filled in from the caller's identity, not the request body.
    #[serde(skip)]
    pub created_by: Option<String>,
}

/// Partial update; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSchedule {
    pub name: Option<String>,
    pub frequency: Option<Frequency>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub environment: Option<String>,
    /// `Some(None)` (JSON `null`) clears the end time.
    #[serde(default, deserialize_with = "present")]
    pub ends_at: Option<Option<DateTime<Utc>>>,
}

/// Tells an explicit `null` apart from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Clone)]
pub struct ScheduleService {
    repo: Arc<dyn ScheduleRepository>,
    clock: Arc<dyn Clock>,
    cron_probe_limit: u32,
}

impl ScheduleService {
    pub fn new(repo: Arc<dyn ScheduleRepository>, clock: Arc<dyn Clock>, cron_probe_limit: u32) -> Self {
        Self {
            repo,
            clock,
            cron_probe_limit,
        }
    }

    pub async fn create(&self, req: CreateSchedule) -> Result<Schedule, SchedulerError> {
        require_non_empty("runbookId", &req.runbook_id)?;
        require_non_empty("name", &req.name)?;
        require_non_empty("environment", &req.environment)?;
        if req.cron_expression.is_some() && req.frequency != Frequency::Cron {
            return Err(SchedulerError::Validation(
                "cronExpression is only allowed with frequency CRON".to_string(),
            ));
        }
        let cron_expression = validate_cadence(req.frequency, req.cron_expression)?;

        let now = self.clock.now();
        let next_run_at = next_for(
            req.frequency,
            cron_expression.as_deref(),
            now,
            self.cron_probe_limit,
        );

        let schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            runbook_id: req.runbook_id.trim().to_string(),
            name: req.name.trim().to_string(),
            frequency: req.frequency,
            cron_expression,
            timezone: req.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            environment: req.environment,
            is_active: true,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            created_by: req.created_by,
            ends_at: req.ends_at,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_schedule(&schedule).await?;

        info!(
            schedule_id = %schedule.id,
            runbook_id = %schedule.runbook_id,
            frequency = %schedule.frequency,
            next_run_at = %next_run_at,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn get(&self, id: &str) -> Result<Schedule, SchedulerError> {
        self.repo
            .get_schedule(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub async fn update(&self, id: &str, patch: UpdateSchedule) -> Result<Schedule, SchedulerError> {
        let mut schedule = self.get(id).await?;

        if let Some(name) = patch.name {
            require_non_empty("name", &name)?;
            schedule.name = name.trim().to_string();
        }
        if let Some(environment) = patch.environment {
            require_non_empty("environment", &environment)?;
            schedule.environment = environment;
        }
        if let Some(timezone) = patch.timezone {
            schedule.timezone = timezone;
        }
        if let Some(ends_at) = patch.ends_at {
            schedule.ends_at = ends_at;
        }

        let cadence_changed = patch.frequency.is_some() || patch.cron_expression.is_some();
        let frequency = patch.frequency.unwrap_or(schedule.frequency);
        if patch.cron_expression.is_some() && frequency != Frequency::Cron {
            return Err(SchedulerError::Validation(
                "cronExpression is only allowed with frequency CRON".to_string(),
            ));
        }
        // Leaving CRON drops the old expression.
        let cron_expression = match (patch.cron_expression, frequency) {
            (Some(expr), _) => Some(expr),
            (None, Frequency::Cron) => schedule.cron_expression.take(),
            (None, _) => None,
        };
        schedule.cron_expression = validate_cadence(frequency, cron_expression)?;
        schedule.frequency = frequency;

        let now = self.clock.now();
        if cadence_changed {
            schedule.next_run_at = Some(compute_next_with_limit(&schedule, now, self.cron_probe_limit));
        }
        schedule.updated_at = now;

        if !self.repo.update_schedule(&schedule, cadence_changed).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(schedule_id = %id, frequency = %schedule.frequency, "Schedule updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), SchedulerError> {
        if !self.repo.delete_schedule(id).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }

    /// Deactivate without touching `last_run_at` / `next_run_at`.
    pub async fn pause(&self, id: &str) -> Result<Schedule, SchedulerError> {
        if !self.repo.pause_schedule(id, self.clock.now()).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(schedule_id = %id, "Schedule paused");
        self.get(id).await
    }

    /// Reactivate and plan the next run from now.
    pub async fn resume(&self, id: &str) -> Result<Schedule, SchedulerError> {
        let schedule = self.get(id).await?;
        let now = self.clock.now();
        let next_run_at = compute_next_with_limit(&schedule, now, self.cron_probe_limit);

        if !self.repo.resume_schedule(id, next_run_at, now).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(schedule_id = %id, next_run_at = %next_run_at, "Schedule resumed");
        self.get(id).await
    }

    pub async fn list_for_runbook(&self, runbook_id: &str) -> Result<Vec<Schedule>, SchedulerError> {
        Ok(self.repo.list_by_runbook(runbook_id).await?)
    }

    pub async fn list_executions_for_runbook(
        &self,
        runbook_id: &str,
    ) -> Result<Vec<Execution>, SchedulerError> {
        Ok(self.repo.list_executions_for_runbook(runbook_id).await?)
    }

    /// Dry run: the next `count` due times from now.
    pub async fn preview(&self, id: &str, count: usize) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        if count == 0 || count > MAX_PREVIEW_RUNS {
            return Err(SchedulerError::Validation(format!(
                "count must be between 1 and {}",
                MAX_PREVIEW_RUNS
            )));
        }
        let schedule = self.get(id).await?;
        Ok(preview(&schedule, self.clock.now(), count, self.cron_probe_limit))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), SchedulerError> {
    if value.trim().is_empty() {
        return Err(SchedulerError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// A cron expression is required for, and only kept with, `CRON`.
fn validate_cadence(
    frequency: Frequency,
    cron_expression: Option<String>,
) -> Result<Option<String>, SchedulerError> {
    match frequency {
        Frequency::Cron => {
            let expr = cron_expression
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .ok_or_else(|| {
                    SchedulerError::Validation("cronExpression is required for frequency CRON".to_string())
                })?;
            CronExpr::parse(&expr)?;
            Ok(Some(expr))
        }
        _ => Ok(None),
    }
}
