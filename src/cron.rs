//! A small five-field cron expression evaluator.
//!
//! Expressions have the classic `minute hour day month weekday` layout. Each
//! field is either the wildcard `*`, a literal value, an inclusive range
//! `a-b`, or a comma-separated list of values and ranges. Weekdays run 0-6
//! with Sunday as 0. All evaluation is against UTC.
//!
//! Step syntax (`*/5`) and names (`MON`, `JAN`) are deliberately unsupported
//! and rejected at parse time; an every-five-minutes schedule is written as
//! the explicit list `0,5,10,...,55`.
//!
//! # Example
//!
//! ```
//! use taskmill::cron::CronExpr;
//! use chrono::{TimeZone, Utc};
//!
//! let midnight = "0 0 * * *".parse::<CronExpr>().unwrap();
//!
//! assert!(midnight.matches(Utc.with_ymd_and_hms(2026, 8, 27, 0, 0, 0).unwrap()));
//! assert!(!midnight.matches(Utc.with_ymd_and_hms(2026, 8, 27, 0, 1, 0).unwrap()));
//! ```
use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 cron fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),
    #[error("unsupported cron syntax in {field} field: '{token}'")]
    UnsupportedSyntax { field: &'static str, token: String },
    #[error("value {value} out of range for {field} field ({min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("cron expression never matches within {0} days")]
    NeverMatches(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(Vec<u32>),
}

impl CronField {
    fn parse(token: &str, field: &'static str, min: u32, max: u32) -> Result<Self, CronError> {
        if token == "*" {
            return Ok(Self::Any);
        }
        let mut values = Vec::new();
        for part in token.split(',') {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_value(start, field, min, max)?;
                    let end = parse_value(end, field, min, max)?;
                    if start > end {
                        return Err(CronError::UnsupportedSyntax {
                            field,
                            token: part.to_owned(),
                        });
                    }
                    values.extend(start..=end);
                }
                None => values.push(parse_value(part, field, min, max)?),
            }
        }
        Ok(Self::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(values) => values.contains(&value),
        }
    }
}

fn parse_value(token: &str, field: &'static str, min: u32, max: u32) -> Result<u32, CronError> {
    let value: u32 = token.parse().map_err(|_| CronError::UnsupportedSyntax {
        field,
        token: token.to_owned(),
    })?;
    if value < min || value > max {
        return Err(CronError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

impl std::str::FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl CronExpr {
    /// The search horizon for [`CronExpr::next_run`]. One leap year of
    /// minutes covers every satisfiable expression this grammar can state.
    const HORIZON_DAYS: i64 = 366;

    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        Ok(Self {
            minute: CronField::parse(fields[0], "minute", 0, 59)?,
            hour: CronField::parse(fields[1], "hour", 0, 23)?,
            day: CronField::parse(fields[2], "day", 1, 31)?,
            month: CronField::parse(fields[3], "month", 1, 12)?,
            weekday: CronField::parse(fields[4], "weekday", 0, 6)?,
        })
    }

    /// Whether the expression matches the given instant, ignoring seconds.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.minute.matches(instant.minute())
            && self.hour.matches(instant.hour())
            && self.day.matches(instant.day())
            && self.month.matches(instant.month())
            && self
                .weekday
                .matches(instant.weekday().num_days_from_sunday())
    }

    /// The first matching instant strictly after `from`, found by stepping
    /// one minute at a time.
    ///
    /// Errors with [`CronError::NeverMatches`] rather than looping forever
    /// for expressions with no occurrence inside the horizon, such as
    /// `0 0 30 2 *`.
    pub fn next_run(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let mut cursor = truncate_to_minute(from) + TimeDelta::minutes(1);
        for _ in 0..Self::HORIZON_DAYS * 24 * 60 {
            if self.matches(cursor) {
                return Ok(cursor);
            }
            cursor += TimeDelta::minutes(1);
        }
        Err(CronError::NeverMatches(Self::HORIZON_DAYS))
    }
}

pub(crate) fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}
