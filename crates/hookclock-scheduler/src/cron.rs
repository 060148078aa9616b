//! Cron expression parser and schedule generator.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds), evaluated in UTC.
//! Fields: *, N, A-B, */S, A-B/S, A/S, comma lists, JAN-DEC, SUN-SAT (7 = Sunday).
//! Macros: @yearly @annually @monthly @weekly @daily @midnight @hourly
//! Example: "0 8 * * 1-5" = weekdays at 8:00

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::error::{Result, SchedulerError};

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// How far ahead `next_after` searches before deciding an expression never fires.
/// Wide enough for Feb 29 combined with a weekday restriction.
const SEARCH_YEARS: i32 = 30;

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// False when the field was written starting with `*`.
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronSchedule {
    /// Parse a cron expression. Expressions that can never fire are rejected.
    pub fn parse(expression: &str) -> Result<Self> {
        let expanded = expand_macro(expression.trim());
        let parts: Vec<&str> = expanded.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "'{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }

        let mut days_of_week = parse_field(parts[4], 0, 7, DAY_NAMES, 0)
            .map_err(|e| invalid(expression, "day of week", e))?;
        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        let schedule = Self {
            expression: expression.trim().to_string(),
            minutes: parse_field(parts[0], 0, 59, &[], 0)
                .map_err(|e| invalid(expression, "minute", e))?,
            hours: parse_field(parts[1], 0, 23, &[], 0)
                .map_err(|e| invalid(expression, "hour", e))?,
            days_of_month: parse_field(parts[2], 1, 31, &[], 0)
                .map_err(|e| invalid(expression, "day of month", e))?,
            months: parse_field(parts[3], 1, 12, MONTH_NAMES, 1)
                .map_err(|e| invalid(expression, "month", e))?,
            days_of_week,
        };

        let probe = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        if probe.and_then(|p| schedule.next_after(p)).is_none() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "'{expression}' never fires"
            )));
        }
        Ok(schedule)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` (truncated to the minute) satisfies the expression.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.months.contains(at.month())
            && self.day_matches(at.date_naive())
    }

    /// The first matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let naive = after.naive_utc();
        let mut t: NaiveDateTime =
            naive.date().and_hms_opt(naive.hour(), naive.minute(), 0)? + Duration::minutes(1);
        let last_year = after.year() + SEARCH_YEARS;

        loop {
            if t.year() > last_year {
                return None;
            }
            if !self.months.contains(t.month()) {
                let (y, m) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }
    }

    /// Standard cron day rule: when both day fields are restricted, either may match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Produce exactly `n` fire times strictly after `from`, in increasing order.
pub fn generate_schedule_times(
    from: DateTime<Utc>,
    n: usize,
    schedule: &CronSchedule,
) -> Vec<DateTime<Utc>> {
    let mut times = Vec::with_capacity(n);
    let mut current = from;
    while times.len() < n {
        match schedule.next_after(current) {
            Some(next) => {
                times.push(next);
                current = next;
            }
            None => break,
        }
    }
    times
}

fn expand_macro(expression: &str) -> &str {
    match expression.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        _ => expression,
    }
}

fn invalid(expression: &str, field: &str, reason: String) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!("'{expression}': bad {field} field: {reason}"))
}

/// Parse one cron field into a bitmask of matching values.
/// `names[i]` stands for the value `i + name_offset`.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_offset: u32,
) -> std::result::Result<Field, String> {
    let mut bits = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(a, names, name_offset)?,
                parse_value(b, names, name_offset)?,
            )
        } else {
            let v = parse_value(range, names, name_offset)?;
            // "A/S" means "from A to the end, every S".
            (v, if step.is_some() { max } else { v })
        };

        if start < min || end > max || start > end {
            return Err(format!("'{part}' out of range {min}-{max}"));
        }
        for v in (start..=end).step_by(step.unwrap_or(1) as usize) {
            bits |= 1u64 << v;
        }
    }

    Ok(Field {
        bits,
        restricted: !field.starts_with('*'),
    })
}

fn parse_value(value: &str, names: &[&str], name_offset: u32) -> std::result::Result<u32, String> {
    if let Ok(n) = value.parse::<u32>() {
        return Ok(n);
    }
    names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|i| i as u32 + name_offset)
        .ok_or_else(|| format!("bad value '{value}'"))
}
