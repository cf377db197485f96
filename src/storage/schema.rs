//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            runbook_id TEXT NOT NULL,
            name TEXT NOT NULL,
            frequency TEXT NOT NULL,
            cron_expression TEXT,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            environment TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_run_at TEXT,
            next_run_at TEXT,
            created_by TEXT,
            ends_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((frequency = 'CRON') = (cron_expression IS NOT NULL))
        );

        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            runbook_id TEXT NOT NULL,
            schedule_id TEXT,
            status TEXT NOT NULL,
            triggered_by TEXT NOT NULL,
            triggered_by_name TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            environment TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_runbook ON schedules(runbook_id);
        CREATE INDEX IF NOT EXISTS idx_schedules_active ON schedules(is_active);
        CREATE INDEX IF NOT EXISTS idx_executions_runbook ON executions(runbook_id, created_at);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
