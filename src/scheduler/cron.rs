// ABOUTME: Cron schedules backed by croner
// ABOUTME: Five fields (min hour dom month dow) or six with a leading seconds field

use chrono::{DateTime, TimeZone};
use croner::Cron;
use std::fmt;
use std::str::FromStr;

pub use croner::errors::CronError;

/// A parsed cron schedule, evaluated in the time zone of the instant passed
/// to `next_after`. Day-of-month and day-of-week match when either does.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    cron: Cron,
    raw: String,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let raw = expression.trim();
        let cron = Cron::new(raw).with_seconds_optional().parse()?;
        Ok(Self {
            cron,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First matching instant strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self.cron.find_next_occurrence(after, false) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::debug!("Schedule '{}' has no next run: {}", self.raw, e);
                None
            }
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
