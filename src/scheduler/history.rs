//! Execution records created when a schedule fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEDULER_ACTOR: &str = "scheduler";
pub const SCHEDULER_ACTOR_NAME: &str = "Scheduler";
pub const SCHEDULED_TRIGGER: &str = "scheduled";

/// Lifecycle of an execution. The scheduler only ever creates `QUEUED`
/// records; the execution engine moves them on from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    /// Unknown values written by the engine read back as `Queued`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "RUNNING" => ExecutionStatus::Running,
            "SUCCEEDED" => ExecutionStatus::Succeeded,
            "FAILED" => ExecutionStatus::Failed,
            "CANCELLED" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Queued,
        }
    }
}

/// One firing of a runbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub runbook_id: String,
    pub schedule_id: Option<String>,
    pub status: ExecutionStatus,
    pub triggered_by: String,
    pub triggered_by_name: String,
    pub trigger_type: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to queue a new execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub runbook_id: String,
    pub schedule_id: Option<String>,
    pub triggered_by: String,
    pub triggered_by_name: String,
    pub trigger_type: String,
    pub environment: String,
}

impl NewExecution {
    /// The execution a schedule produces when it fires.
    pub fn scheduled(schedule: &super::Schedule) -> Self {
        Self {
            runbook_id: schedule.runbook_id.clone(),
            schedule_id: Some(schedule.id.clone()),
            triggered_by: schedule
                .created_by
                .clone()
                .unwrap_or_else(|| SCHEDULER_ACTOR.to_string()),
            triggered_by_name: SCHEDULER_ACTOR_NAME.to_string(),
            trigger_type: SCHEDULED_TRIGGER.to_string(),
            environment: schedule.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Frequency, Schedule};

    fn schedule(created_by: Option<&str>) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: "s1".into(),
            runbook_id: "rb1".into(),
            name: "nightly".into(),
            frequency: Frequency::Daily,
            cron_expression: None,
            timezone: "UTC".into(),
            environment: "production".into(),
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            created_by: created_by.map(String::from),
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_scheduled_execution_uses_creator_as_actor() {
        let new = NewExecution::scheduled(&schedule(Some("alice")));
        assert_eq!(new.triggered_by, "alice");
        assert_eq!(new.triggered_by_name, "Scheduler");
        assert_eq!(new.trigger_type, "scheduled");
        assert_eq!(new.environment, "production");
        assert_eq!(new.schedule_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_scheduled_execution_defaults_actor() {
        let new = NewExecution::scheduled(&schedule(None));
        assert_eq!(new.triggered_by, "scheduler");
    }

    #[test]
    fn test_status_db_round_trip() {
        for status in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::from_db(status.as_str()), status);
        }
    }
}
