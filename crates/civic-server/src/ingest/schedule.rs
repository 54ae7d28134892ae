//! Schedule expression evaluation
//!
//! Pure functions over cron expressions, evaluated in UTC so daylight saving
//! transitions never skip or double a run.
//!
//! Accepted forms:
//! - crontab style, 5 fields: `min hour day-of-month month day-of-week`
//! - 6 or 7 fields with leading seconds (and trailing year)
//! - `@hourly`, `@daily` / `@midnight`, `@weekly`, `@monthly`, `@yearly` / `@annually`
//!
//! Numeric days of the week follow crontab: 0 and 7 are Sunday, 1 is Monday.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid schedule '{expression}': {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

impl ScheduleError {
    fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite `expression` into the seconds-first form the cron parser expects.
pub fn normalize(expression: &str) -> Result<String, ScheduleError> {
    let trimmed = expression.trim();

    if let Some(alias) = trimmed.strip_prefix('@') {
        let expanded = match alias.to_ascii_lowercase().as_str() {
            "hourly" => "0 0 * * * *",
            "daily" | "midnight" => "0 0 0 * * *",
            "weekly" => "0 0 0 * * SUN",
            "monthly" => "0 0 0 1 * *",
            "yearly" | "annually" => "0 0 0 1 1 *",
            _ => return Err(ScheduleError::new(expression, "unknown alias")),
        };
        return Ok(expanded.to_string());
    }

    let mut fields: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
    let dow_index = match fields.len() {
        5 => {
            fields.insert(0, "0".to_string());
            5
        },
        6 | 7 => 5,
        n => {
            return Err(ScheduleError::new(
                expression,
                format!("expected 5, 6 or 7 fields, found {n}"),
            ))
        },
    };

    fields[dow_index] = day_of_week_names(&fields[dow_index])
        .map_err(|reason| ScheduleError::new(expression, reason))?;

    Ok(fields.join(" "))
}

/// Expand a day-of-week field into an explicit list of day names.
///
/// Crontab numbers Sunday 0 or 7 while the cron parser numbers it 1, so
/// ranges and steps are resolved here rather than passed through. A range
/// whose end comes before its start wraps over the weekend (`FRI-MON`).
fn day_of_week_names(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| format!("invalid step '{step}'"))?;
                (range, Some(step))
            },
            None => (item, None),
        };

        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 7),
            Some((start, end)) => (day_number(start)?, day_number(end)?),
            None if step.is_some() => (day_number(range)?, 7),
            None => {
                let day = day_number(range)?;
                (day, day)
            },
        };
        let end = if end < start { end + 7 } else { end };

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    Ok(DAY_NAMES
        .iter()
        .zip(days)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect::<Vec<_>>()
        .join(","))
}

/// `0`-`7` or a three letter name; Sunday is 0.
fn day_number(token: &str) -> Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day of week {n} out of range 0-7"))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day of week '{token}'"))
}

pub fn parse(expression: &str) -> Result<Schedule, ScheduleError> {
    let normalized = normalize(expression)?;
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::new(expression, e.to_string()))
}

pub fn validate(expression: &str) -> Result<(), ScheduleError> {
    parse(expression).map(|_| ())
}

/// First firing time strictly after `after`, or `None` if the expression
/// never fires again.
pub fn next_due_time(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(parse(expression)?.after(&after).next())
}

/// Whether the expression fires inside the window `(window_start, now]`.
pub fn is_due(
    expression: &str,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    if now <= window_start {
        return Ok(false);
    }
    Ok(next_due_time(expression, window_start)?.is_some_and(|next| next <= now))
}
