//! Crawler schedules
//!
//! # Syntax
//!
//! | expression | meaning |
//! |------------|---------|
//! | `disabled` | never scheduled |
//! | `hourly`, `daily`, `weekly`, `monthly` (optionally `@`-prefixed) | fixed interval since the last run; a month is 4 weeks |
//! | `@every 90m` | fixed interval, units `s`, `m`, `h`, `d` |
//! | `0 3 * * *` | cron, 5 fields (seconds default to 0) |
//! | `0 0 3 * * MON` | cron, 6 or 7 fields (with seconds / year) |

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a schedule expression
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("empty schedule expression")]
    Empty,

    #[error("invalid interval '{0}': expected '@every <n><s|m|h|d>' with n > 0")]
    InvalidInterval(String),

    #[error("invalid cron expression '{expr}': {message}")]
    Cron { expr: String, message: String },
}

/// A parsed schedule
#[derive(Debug, Clone)]
pub enum Schedule {
    Disabled,
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let lower = expr.to_ascii_lowercase();
        let named = lower.strip_prefix('@').unwrap_or(&lower);
        match named {
            "disabled" => return Ok(Self::Disabled),
            "hourly" => return Ok(Self::Interval(Duration::hours(1))),
            "daily" => return Ok(Self::Interval(Duration::days(1))),
            "weekly" => return Ok(Self::Interval(Duration::weeks(1))),
            "monthly" => return Ok(Self::Interval(Duration::weeks(4))),
            _ => {}
        }

        if let Some(every) = named.strip_prefix("every") {
            return parse_interval(every.trim())
                .map(Self::Interval)
                .ok_or_else(|| ScheduleError::InvalidInterval(expr.to_string()));
        }

        let fields = expr.split_whitespace().count();
        let cron_expr = match fields {
            5 => format!("0 {}", expr),
            6 | 7 => expr.to_string(),
            _ => {
                return Err(ScheduleError::Cron {
                    expr: expr.to_string(),
                    message: format!("expected 5 to 7 fields, got {}", fields),
                })
            }
        };

        cron::Schedule::from_str(&cron_expr)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| ScheduleError::Cron {
                expr: expr.to_string(),
                message: e.to_string(),
            })
    }

    /// Next time the schedule fires after a run at `last_run`
    pub fn next_after(&self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Disabled => None,
            Self::Interval(interval) => last_run.checked_add_signed(*interval),
            Self::Cron(schedule) => schedule.after(&last_run).next(),
        }
    }

    /// Returns true if the schedule fired between `last_run` and `now`
    pub fn is_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_after(last_run).map_or(false, |next| next <= now)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Interval(interval) => write!(f, "@every {}s", interval.num_seconds()),
            Self::Cron(schedule) => write!(f, "{}", schedule),
        }
    }
}

fn parse_interval(text: &str) -> Option<Duration> {
    let unit_at = text.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = text.split_at(unit_at);
    let amount: i64 = amount.parse().ok().filter(|n| *n > 0)?;

    match unit.trim() {
        "s" => Some(Duration::seconds(amount)),
        "m" => Some(Duration::minutes(amount)),
        "h" => Some(Duration::hours(amount)),
        "d" => Some(Duration::days(amount)),
        _ => None,
    }
}
