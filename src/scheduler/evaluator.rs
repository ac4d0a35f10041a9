//! Pure schedule arithmetic: due checks and next-occurrence computation.
//!
//! Cron expressions are accepted in three shapes:
//!
//! - 5 fields, minute first (`0 0 * * *`), with day-of-week 0-6 from Sunday
//! - 6 fields, second first (`30 0 0 * * *`), same day-of-week numbering
//! - 7 fields with a trailing year, or `@daily`-style macros, passed through as is
//!
//! Nothing here returns an error to the scanners. A malformed expression or an
//! unknown timezone degrades to "no next run" or UTC respectively, with a warning.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::schedule::Recurring;
use crate::error::{CoordinatorError, Result};

/// `enabled && next_run_time <= now`. A schedule with no next run is never due.
pub fn is_due<S: Recurring + ?Sized>(schedule: &S, now: DateTime<Utc>) -> bool {
    schedule.enabled()
        && schedule
            .next_run_time()
            .map_or(false, |next_run| next_run <= now)
}

/// Resolve an IANA timezone name, falling back to UTC when it is unknown.
pub fn resolve_timezone(name: &str) -> Tz {
    let name = name.trim();
    if name.is_empty() {
        return Tz::UTC;
    }
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(timezone = name, "Unknown timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Parse a cron expression in any of the accepted shapes.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized).map_err(|e| {
        CoordinatorError::InvalidSchedule(format!("'{}': {}", expression.trim(), e))
    })
}

/// First occurrence of `expression` strictly after `from`, evaluated in
/// `timezone`. Returns `None` for expressions that do not parse or never fire.
pub fn next_occurrence(
    expression: &str,
    from: DateTime<Utc>,
    timezone: &str,
) -> Option<DateTime<Utc>> {
    next_occurrences(expression, from, timezone, 1).into_iter().next()
}

/// Up to `count` upcoming occurrences strictly after `from`.
pub fn next_occurrences(
    expression: &str,
    from: DateTime<Utc>,
    timezone: &str,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let schedule = match parse_cron(expression) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(expression, error = %e, "Invalid cron expression");
            return Vec::new();
        }
    };

    let tz = resolve_timezone(timezone);
    schedule
        .after(&from.with_timezone(&tz))
        .map(|occurrence| occurrence.with_timezone(&Utc))
        .filter(|occurrence| *occurrence > from)
        .take(count)
        .collect()
}

/// Next run of a fixed-period schedule. A zero period never fires again.
pub fn next_interval_run(interval: Duration, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if interval.is_zero() {
        tracing::warn!("Interval schedule has a zero period");
        return None;
    }
    let step = chrono::Duration::from_std(interval).ok()?;
    from.checked_add_signed(step)
}

fn normalize_expression(expression: &str) -> Result<String> {
    let expression = expression.trim();
    if expression.starts_with('@') {
        return Ok(expression.to_string());
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = translate_day_of_week(fields[4]);
            Ok(format!("0 {} {}", fields[..4].join(" "), day_of_week))
        }
        6 => {
            let day_of_week = translate_day_of_week(fields[5]);
            Ok(format!("{} {}", fields[..5].join(" "), day_of_week))
        }
        7 => Ok(fields.join(" ")),
        n => Err(CoordinatorError::InvalidSchedule(format!(
            "'{}' has {} fields, expected 5, 6 or 7",
            expression, n
        ))),
    }
}

/// Map Sunday-based 0-6 day numbers (7 also meaning Sunday) onto the 1-7
/// numbering the parser uses. Names and wildcards pass through.
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let translated = match base.split_once('-') {
                Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
                    (Ok(start), Ok(7)) if start > 0 && step.is_none() => {
                        // Wraps onto Sunday, which sorts first in the target numbering.
                        format!("{}-7,1", start + 1)
                    }
                    (Ok(start), Ok(end)) => format!("{}-{}", shift_day(start), end.min(6) + 1),
                    _ => base.to_string(),
                },
                None => match base.parse::<u32>() {
                    Ok(day) => shift_day(day).to_string(),
                    Err(_) => base.to_string(),
                },
            };
            match step {
                Some(step) => format!("{}/{}", translated, step),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_day(day: u32) -> u32 {
    if day <= 7 {
        day % 7 + 1
    } else {
        day
    }
}
