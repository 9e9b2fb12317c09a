//! Schedule expressions
//!
//! Accepts the two cron dialects found in task rows:
//! - 5 fields: `minute hour day-of-month month day-of-week`
//! - 6 fields: `second minute hour day-of-month month day-of-week`
//!
//! Both use Unix day-of-week numbering (0 or 7 = Sunday). The normalized
//! form is always 6 fields separated by single spaces, so `*/5 * * * *` and
//! `0  */5 * * * *` name the same schedule.

use crate::domain::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Parsed, normalized schedule expression
#[derive(Debug, Clone)]
pub struct ScheduleExpression {
    normalized: String,
    schedule: Schedule,
}

impl ScheduleExpression {
    /// Parse and validate a raw expression
    pub fn parse(raw: &str) -> Result<Self> {
        let field_count = raw.split_whitespace().count();
        if field_count != 5 && field_count != 6 {
            return Err(DomainError::InvalidSchedule {
                expression: raw.to_string(),
                reason: format!("expected 5 or 6 fields, got {}", field_count),
            });
        }

        let normalized = Self::normalize(raw);
        let cron_expr = to_cron_crate_format(&normalized).map_err(|reason| {
            DomainError::InvalidSchedule {
                expression: raw.to_string(),
                reason,
            }
        })?;

        let schedule = Schedule::from_str(&cron_expr).map_err(|e| DomainError::InvalidSchedule {
            expression: raw.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            normalized,
            schedule,
        })
    }

    /// Normalize without validating (used as the grouping key)
    pub fn normalize(raw: &str) -> String {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() == 5 {
            format!("0 {}", fields.join(" "))
        } else {
            fields.join(" ")
        }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Next occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl PartialEq for ScheduleExpression {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for ScheduleExpression {}

impl std::fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// The `cron` crate numbers days of week 1-7 starting at Sunday and wants a
/// trailing year field.
fn to_cron_crate_format(normalized: &str) -> std::result::Result<String, String> {
    let mut fields: Vec<String> = normalized.split(' ').map(str::to_string).collect();
    let dow = fields
        .last()
        .ok_or_else(|| "empty expression".to_string())?
        .clone();
    if let Some(last) = fields.last_mut() {
        *last = translate_day_of_week(&dow)?;
    }
    fields.push("*".to_string());
    Ok(fields.join(" "))
}

/// Unix day-of-week numbers (0-7, both ends Sunday) become the `cron`
/// crate's 1-7. Numeric ranges and steps are expanded to an explicit list
/// first, since a step counts Unix days and would drift after shifting.
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(step)?)),
            None => (item, None),
        };

        let bounds = match (range, range.split_once('-')) {
            ("*" | "?", _) => Some((0, 7)),
            (_, Some((first, last))) => day_number(first)?.zip(day_number(last)?),
            // `n/step` runs to the end of the week
            (_, None) => day_number(range)?.map(|day| match step {
                Some(_) => (day, 7),
                None => (day, day),
            }),
        };
        // Day names share the numbering, pass them through
        let Some((first, last)) = bounds else {
            named.push(item.to_string());
            continue;
        };
        if first > last {
            return Err(format!("day of week range reversed: {}", item));
        }

        for day in (first..=last).step_by(step.unwrap_or(1)) {
            days.insert(if day == 7 { 1 } else { day + 1 });
        }
    }

    let mut items: Vec<String> = days.iter().map(u8::to_string).collect();
    items.extend(named);
    Ok(items.join(","))
}

/// `None` for a non-numeric token such as `MON`
fn day_number(token: &str) -> std::result::Result<Option<u8>, String> {
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<u8>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day of week out of range: {}", token)),
    }
}

fn parse_step(step: &str) -> std::result::Result<usize, String> {
    match step.parse::<usize>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(format!("invalid day of week step: {}", step)),
    }
}
