//! Next due-time computation for each cadence.

use chrono::{DateTime, Duration, DurationRound, Months, Utc};
use tracing::warn;

use super::cron::CronExpr;
use super::{Frequency, Schedule};

/// Default number of one-minute probes a cron schedule is searched over (24h).
pub const DEFAULT_CRON_PROBE_LIMIT: u32 = 1_440;

/// Compute the next due time of `schedule` strictly after `from`.
pub fn compute_next(schedule: &Schedule, from: DateTime<Utc>) -> DateTime<Utc> {
    compute_next_with_limit(schedule, from, DEFAULT_CRON_PROBE_LIMIT)
}

pub fn compute_next_with_limit(
    schedule: &Schedule,
    from: DateTime<Utc>,
    probe_limit: u32,
) -> DateTime<Utc> {
    next_for(schedule.frequency, schedule.cron_expression.as_deref(), from, probe_limit)
}

/// Same as [`compute_next_with_limit`] for a cadence that is not yet stored
/// as a [`Schedule`].
pub fn next_for(
    frequency: Frequency,
    cron_expression: Option<&str>,
    from: DateTime<Utc>,
    probe_limit: u32,
) -> DateTime<Utc> {
    match frequency {
        Frequency::Hourly => from + Duration::hours(1),
        Frequency::Daily => from + Duration::hours(24),
        Frequency::Weekly => from + Duration::days(7),
        // Saturates to the last day of a shorter month (Jan 31 -> Feb 28/29).
        Frequency::Monthly => from
            .checked_add_months(Months::new(1))
            .unwrap_or(from + Duration::days(30)),
        Frequency::Cron => match cron_expression.map(CronExpr::parse) {
            Some(Ok(cron)) => next_cron_match(&cron, from, probe_limit),
            Some(Err(e)) => {
                warn!(error = %e, "Invalid cron expression, falling back to +24h");
                from + Duration::hours(24)
            }
            None => {
                warn!("Cron schedule without an expression, falling back to +24h");
                from + Duration::hours(24)
            }
        },
    }
}

/// Probe minute by minute after `from`. Gives up after `probe_limit` probes
/// and returns `from + 24h` so an expression with a longer period still
/// terminates.
fn next_cron_match(cron: &CronExpr, from: DateTime<Utc>, probe_limit: u32) -> DateTime<Utc> {
    let base = from.duration_trunc(Duration::minutes(1)).unwrap_or(from);
    (1..=i64::from(probe_limit))
        .map(|minutes| base + Duration::minutes(minutes))
        .find(|candidate| cron.matches(*candidate))
        .unwrap_or(from + Duration::hours(24))
}

/// The next `count` due times after `from`, stopping early at `ends_at`.
pub fn preview(
    schedule: &Schedule,
    from: DateTime<Utc>,
    count: usize,
    probe_limit: u32,
) -> Vec<DateTime<Utc>> {
    let mut runs = Vec::with_capacity(count);
    let mut cursor = from;
    while runs.len() < count {
        cursor = compute_next_with_limit(schedule, cursor, probe_limit);
        if schedule.has_ended(cursor) {
            break;
        }
        runs.push(cursor);
    }
    runs
}
