//! Runbook scheduling -- cadences, due-time evaluation, dispatch and lifecycle.

pub mod clock;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod history;
pub mod next_run;
pub mod service;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::dispatch::{Dispatcher, ExecutionEngine, HttpExecutionEngine, LogOnlyEngine};
pub use self::engine::{SchedulerEngine, SchedulerLoop};
pub use self::history::{Execution, ExecutionStatus, NewExecution};
pub use self::service::{CreateSchedule, ScheduleService, UpdateSchedule};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule {0} not found")]
    NotFound(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl Frequency {
    /// Minutes that must elapse since the last run before an interval
    /// schedule without a planned next run is considered due again.
    pub fn fallback_threshold_minutes(self) -> Option<i64> {
        match self {
            Frequency::Hourly => Some(60),
            Frequency::Daily => Some(1_440),
            Frequency::Weekly => Some(10_080),
            Frequency::Monthly => Some(43_200),
            Frequency::Cron => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Cron => "CRON",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOURLY" => Ok(Frequency::Hourly),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "CRON" => Ok(Frequency::Cron),
            other => Err(SchedulerError::Validation(format!(
                "unknown frequency '{}'",
                other
            ))),
        }
    }
}

/// A recurring trigger bound to exactly one runbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub runbook_id: String,
    pub name: String,
    pub frequency: Frequency,
    /// Only set when `frequency` is `CRON`.
    pub cron_expression: Option<String>,
    /// Stored and returned, never applied to due-time arithmetic.
    pub timezone: String,
    pub environment: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// True once the schedule's hard stop has been reached.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|ends_at| ends_at <= now)
    }
}
