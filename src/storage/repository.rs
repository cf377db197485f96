//! Persistence for schedules and the executions they queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::Pool;
use crate::scheduler::{Execution, ExecutionStatus, Frequency, NewExecution, Schedule};

/// Storage contract the scheduler consumes. Each write is an independent
/// single-row statement; there is no optimistic locking.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn list_active_schedules(&self) -> Result<Vec<Schedule>>;

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>>;

    async fn list_by_runbook(&self, runbook_id: &str) -> Result<Vec<Schedule>>;

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Write the editable columns of `schedule`. `next_run_at` is only
    /// written when `reschedule` is set; `is_active` and `last_run_at` are
    /// left to pause/resume and the tick. Returns `false` if the row is gone.
    async fn update_schedule(&self, schedule: &Schedule, reschedule: bool) -> Result<bool>;

    async fn delete_schedule(&self, id: &str) -> Result<bool>;

    /// Clear `is_active` without touching the run timestamps.
    async fn pause_schedule(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn resume_schedule(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_schedule_timestamps(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn create_execution(&self, new: &NewExecution, at: DateTime<Utc>) -> Result<Execution>;

    /// Newest first.
    async fn list_executions_for_runbook(&self, runbook_id: &str) -> Result<Vec<Execution>>;
}

const SCHEDULE_COLUMNS: &str = "id, runbook_id, name, frequency, cron_expression, timezone, environment,
     is_active, last_run_at, next_run_at, created_by, ends_at, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, runbook_id, schedule_id, status, triggered_by, triggered_by_name,
     trigger_type, environment, created_at";

/// [`ScheduleRepository`] over the SQLite pool. Queries run on the blocking
/// thread pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: Pool,
}

impl SqliteRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().context("failed to get database connection")?;
            f(&*conn)
        })
        .await
        .context("database task panicked")?
    }
}

#[async_trait]
impl ScheduleRepository for SqliteRepository {
    async fn list_active_schedules(&self) -> Result<Vec<Schedule>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM schedules WHERE is_active = 1 ORDER BY created_at, id",
                SCHEDULE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], schedule_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read active schedules")
        })
        .await
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM schedules WHERE id = ?1", SCHEDULE_COLUMNS);
            conn.query_row(&sql, params![id], schedule_from_row)
                .optional()
                .context("failed to read schedule")
        })
        .await
    }

    async fn list_by_runbook(&self, runbook_id: &str) -> Result<Vec<Schedule>> {
        let runbook_id = runbook_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM schedules WHERE runbook_id = ?1 ORDER BY created_at, id",
                SCHEDULE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![runbook_id], schedule_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read runbook schedules")
        })
        .await
    }

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        let s = schedule.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO schedules (id, runbook_id, name, frequency, cron_expression, timezone, environment,
                                        is_active, last_run_at, next_run_at, created_by, ends_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    s.id,
                    s.runbook_id,
                    s.name,
                    s.frequency.as_str(),
                    s.cron_expression,
                    s.timezone,
                    s.environment,
                    s.is_active,
                    s.last_run_at.map(|t| t.to_rfc3339()),
                    s.next_run_at.map(|t| t.to_rfc3339()),
                    s.created_by,
                    s.ends_at.map(|t| t.to_rfc3339()),
                    s.created_at.to_rfc3339(),
                    s.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert schedule")?;
            Ok(())
        })
        .await
    }

    async fn update_schedule(&self, schedule: &Schedule, reschedule: bool) -> Result<bool> {
        let s = schedule.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE schedules
                     SET name = ?2, frequency = ?3, cron_expression = ?4, timezone = ?5, environment = ?6,
                         ends_at = ?7, updated_at = ?8,
                         next_run_at = CASE WHEN ?9 THEN ?10 ELSE next_run_at END
                     WHERE id = ?1",
                    params![
                        s.id,
                        s.name,
                        s.frequency.as_str(),
                        s.cron_expression,
                        s.timezone,
                        s.environment,
                        s.ends_at.map(|t| t.to_rfc3339()),
                        s.updated_at.to_rfc3339(),
                        reschedule,
                        s.next_run_at.map(|t| t.to_rfc3339()),
                    ],
                )
                .context("failed to update schedule")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM schedules WHERE id = ?1", params![id])
                .context("failed to delete schedule")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn pause_schedule(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE schedules SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                    params![id, at.to_rfc3339()],
                )
                .context("failed to pause schedule")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn resume_schedule(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE schedules SET is_active = 1, next_run_at = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, next_run_at.to_rfc3339(), at.to_rfc3339()],
                )
                .context("failed to resume schedule")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn update_schedule_timestamps(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE schedules SET last_run_at = ?2, next_run_at = ?3, updated_at = ?2 WHERE id = ?1",
                params![id, last_run_at.to_rfc3339(), next_run_at.to_rfc3339()],
            )
            .context("failed to update schedule timestamps")?;
            Ok(())
        })
        .await
    }

    async fn create_execution(&self, new: &NewExecution, at: DateTime<Utc>) -> Result<Execution> {
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            runbook_id: new.runbook_id.clone(),
            schedule_id: new.schedule_id.clone(),
            status: ExecutionStatus::Queued,
            triggered_by: new.triggered_by.clone(),
            triggered_by_name: new.triggered_by_name.clone(),
            trigger_type: new.trigger_type.clone(),
            environment: new.environment.clone(),
            created_at: at,
        };
        let e = execution.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions (id, runbook_id, schedule_id, status, triggered_by, triggered_by_name,
                                         trigger_type, environment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.id,
                    e.runbook_id,
                    e.schedule_id,
                    e.status.as_str(),
                    e.triggered_by,
                    e.triggered_by_name,
                    e.trigger_type,
                    e.environment,
                    e.created_at.to_rfc3339(),
                ],
            )
            .context("failed to insert execution")?;
            Ok(())
        })
        .await?;
        Ok(execution)
    }

    async fn list_executions_for_runbook(&self, runbook_id: &str) -> Result<Vec<Execution>> {
        let runbook_id = runbook_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM executions WHERE runbook_id = ?1 ORDER BY created_at DESC, rowid DESC",
                EXECUTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![runbook_id], execution_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read executions")
        })
        .await
    }
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let frequency: String = row.get(3)?;
    let frequency = frequency
        .parse::<Frequency>()
        .map_err(|e| conversion_error(3, e))?;

    Ok(Schedule {
        id: row.get(0)?,
        runbook_id: row.get(1)?,
        name: row.get(2)?,
        frequency,
        cron_expression: row.get(4)?,
        timezone: row.get(5)?,
        environment: row.get(6)?,
        is_active: row.get(7)?,
        last_run_at: optional_timestamp(row, 8)?,
        next_run_at: optional_timestamp(row, 9)?,
        created_by: row.get(10)?,
        ends_at: optional_timestamp(row, 11)?,
        created_at: timestamp(row, 12)?,
        updated_at: timestamp(row, 13)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(3)?;
    Ok(Execution {
        id: row.get(0)?,
        runbook_id: row.get(1)?,
        schedule_id: row.get(2)?,
        status: ExecutionStatus::from_db(&status),
        triggered_by: row.get(4)?,
        triggered_by_name: row.get(5)?,
        trigger_type: row.get(6)?,
        environment: row.get(7)?,
        created_at: timestamp(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory_pool;
    use chrono::{Duration, TimeZone};

    fn repo() -> SqliteRepository {
        SqliteRepository::new(open_in_memory_pool().unwrap())
    }

    fn schedule(id: &str, runbook_id: &str) -> Schedule {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        Schedule {
            id: id.into(),
            runbook_id: runbook_id.into(),
            name: format!("schedule {}", id),
            frequency: Frequency::Hourly,
            cron_expression: None,
            timezone: "Europe/Berlin".into(),
            environment: "staging".into(),
            is_active: true,
            last_run_at: None,
            next_run_at: Some(now + Duration::hours(1)),
            created_by: Some("alice".into()),
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let repo = repo();
        let s = schedule("s1", "rb1");
        repo.create_schedule(&s).await.unwrap();

        let loaded = repo.get_schedule("s1").await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert!(repo.get_schedule("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_skips_paused() {
        let repo = repo();
        repo.create_schedule(&schedule("s1", "rb1")).await.unwrap();
        repo.create_schedule(&schedule("s2", "rb1")).await.unwrap();

        let at = Utc::now();
        assert!(repo.pause_schedule("s1", at).await.unwrap());

        let active = repo.list_active_schedules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "s2");
    }

    #[tokio::test]
    async fn test_pause_leaves_timestamps_and_resume_sets_next_run() {
        let repo = repo();
        let s = schedule("s1", "rb1");
        repo.create_schedule(&s).await.unwrap();

        repo.pause_schedule("s1", Utc::now()).await.unwrap();
        let paused = repo.get_schedule("s1").await.unwrap().unwrap();
        assert!(!paused.is_active);
        assert_eq!(paused.next_run_at, s.next_run_at);
        assert_eq!(paused.last_run_at, s.last_run_at);

        let next = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert!(repo.resume_schedule("s1", next, Utc::now()).await.unwrap());
        let resumed = repo.get_schedule("s1").await.unwrap().unwrap();
        assert!(resumed.is_active);
        assert_eq!(resumed.next_run_at, Some(next));
    }

    #[tokio::test]
    async fn test_missing_rows_report_false() {
        let repo = repo();
        assert!(!repo.pause_schedule("nope", Utc::now()).await.unwrap());
        assert!(!repo.resume_schedule("nope", Utc::now(), Utc::now()).await.unwrap());
        assert!(!repo.delete_schedule("nope").await.unwrap());
        assert!(!repo.update_schedule(&schedule("nope", "rb"), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_leaves_run_state_alone() {
        let repo = repo();
        let stale = schedule("s1", "rb1");
        repo.create_schedule(&stale).await.unwrap();

        // Paused and fired after `stale` was read.
        let last = Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        repo.update_schedule_timestamps("s1", last, next).await.unwrap();
        repo.pause_schedule("s1", last).await.unwrap();

        let mut edit = stale.clone();
        edit.name = "renamed".into();
        edit.ends_at = Some(next);
        assert!(repo.update_schedule(&edit, false).await.unwrap());

        let stored = repo.get_schedule("s1").await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.ends_at, Some(next));
        assert!(!stored.is_active);
        assert_eq!(stored.last_run_at, Some(last));
        assert_eq!(stored.next_run_at, Some(next));

        let moved = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        edit.next_run_at = Some(moved);
        edit.ends_at = None;
        assert!(repo.update_schedule(&edit, true).await.unwrap());
        let stored = repo.get_schedule("s1").await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(moved));
        assert_eq!(stored.ends_at, None);
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_list_by_runbook_and_delete() {
        let repo = repo();
        repo.create_schedule(&schedule("s1", "rb1")).await.unwrap();
        repo.create_schedule(&schedule("s2", "rb2")).await.unwrap();

        let rb1 = repo.list_by_runbook("rb1").await.unwrap();
        assert_eq!(rb1.len(), 1);
        assert_eq!(rb1[0].id, "s1");

        assert!(repo.delete_schedule("s1").await.unwrap());
        assert!(repo.list_by_runbook("rb1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_update() {
        let repo = repo();
        repo.create_schedule(&schedule("s1", "rb1")).await.unwrap();

        let last = Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap();
        let next = last + Duration::hours(1);
        repo.update_schedule_timestamps("s1", last, next).await.unwrap();

        let s = repo.get_schedule("s1").await.unwrap().unwrap();
        assert_eq!(s.last_run_at, Some(last));
        assert_eq!(s.next_run_at, Some(next));
    }

    #[tokio::test]
    async fn test_create_execution_is_queued_and_listed() {
        let repo = repo();
        let s = schedule("s1", "rb1");
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap();

        let first = repo.create_execution(&NewExecution::scheduled(&s), at).await.unwrap();
        let second = repo
            .create_execution(&NewExecution::scheduled(&s), at + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(first.status, ExecutionStatus::Queued);

        let listed = repo.list_executions_for_runbook("rb1").await.unwrap();
        assert_eq!(listed, vec![second, first]);
        assert!(repo.list_executions_for_runbook("rb2").await.unwrap().is_empty());
    }
}
