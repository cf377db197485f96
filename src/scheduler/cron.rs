//! Five-field cron matching (`minute hour day-of-month month day-of-week`).
//!
//! Each field is one of `*`, a list (`1,3,5`), a range (`9-17`), a step
//! (`*/15`) or a single number. All five fields must match; day-of-month and
//! day-of-week are ANDed rather than ORed as classic cron does.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::warn;

use super::SchedulerError;

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

/// Inclusive value bounds, in field order.
const FIELD_BOUNDS: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    List(Vec<u32>),
    Range(u32, u32),
    /// The left side of `/` is ignored: `*/15` and `5/15` both mean
    /// "value divisible by 15".
    Step(u32),
    Exact(u32),
}

impl Field {
    /// Rules are tried in priority order: `*`, `,`, `-`, `/`, number.
    /// Literal values must fall within `bounds`.
    fn parse(raw: &str, bounds: (u32, u32)) -> Result<Self, String> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        if raw.contains(',') {
            let values = raw
                .split(',')
                .map(|v| bounded(v, raw, bounds))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Field::List(values));
        }
        if let Some((lo, hi)) = raw.split_once('-') {
            let (lo, hi) = (bounded(lo, raw, bounds)?, bounded(hi, raw, bounds)?);
            if lo > hi {
                return Err(format!("range start {} is after its end {} in '{}'", lo, hi, raw));
            }
            return Ok(Field::Range(lo, hi));
        }
        if let Some((_, step)) = raw.split_once('/') {
            let step = number(step, raw)?;
            if step == 0 {
                return Err(format!("step of zero in '{}'", raw));
            }
            return Ok(Field::Step(step));
        }
        Ok(Field::Exact(bounded(raw, raw, bounds)?))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::List(values) => values.contains(&value),
            Field::Range(lo, hi) => *lo <= value && value <= *hi,
            Field::Step(step) => value % step == 0,
            Field::Exact(v) => *v == value,
        }
    }
}

fn number(s: &str, field: &str) -> Result<u32, String> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| format!("'{}' is not a number in field '{}'", s, field))
}

fn bounded(s: &str, field: &str, (min, max): (u32, u32)) -> Result<u32, String> {
    let value = number(s, field)?;
    if value < min || value > max {
        return Err(format!("{} is outside {}-{} in '{}'", value, min, max, field));
    }
    Ok(value)
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    fields: [Field; 5],
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", parts.len())));
        }

        let mut fields = Vec::with_capacity(5);
        for ((raw, name), bounds) in parts.iter().zip(FIELD_NAMES).zip(FIELD_BOUNDS) {
            let field = Field::parse(raw, bounds).map_err(|e| invalid(format!("{}: {}", name, e)))?;
            fields.push(field);
        }

        let fields: [Field; 5] = fields
            .try_into()
            .map_err(|_| invalid("expected 5 fields".to_string()))?;
        Ok(Self { fields })
    }

    /// Day-of-week uses 0 = Sunday.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let values = [
            at.minute(),
            at.hour(),
            at.day(),
            at.month(),
            at.weekday().num_days_from_sunday(),
        ];
        self.fields
            .iter()
            .zip(values)
            .all(|(field, value)| field.matches(value))
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check `expr` against `at` at minute granularity.
///
/// An expression that does not parse never matches; it is logged instead of
/// returned so a single bad schedule cannot take down the loop.
pub fn matches(expr: &str, at: DateTime<Utc>) -> bool {
    match CronExpr::parse(expr) {
        Ok(cron) => cron.matches(at),
        Err(e) => {
            warn!(expr = %expr, error = %e, "Invalid cron expression, treating as non-matching");
            false
        }
    }
}
