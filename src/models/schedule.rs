//! Recurring extraction definitions.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestArgs;

/// Unit of an interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl PeriodUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Seconds => "seconds",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "days" => Some(Self::Days),
            "hours" => Some(Self::Hours),
            "minutes" => Some(Self::Minutes),
            "seconds" => Some(Self::Seconds),
            _ => None,
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            Self::Days => 86_400,
            Self::Hours => 3_600,
            Self::Minutes => 60,
            Self::Seconds => 1,
        }
    }

    /// Length of `every` units, or `None` when it is zero or longer than
    /// [`MAX_INTERVAL_DAYS`].
    pub fn duration(&self, every: u32) -> Option<Duration> {
        let secs = i64::from(every) * self.seconds();
        (secs > 0 && secs <= MAX_INTERVAL_DAYS * 86_400).then(|| Duration::seconds(secs))
    }
}

/// Longest interval a schedule may use.
pub const MAX_INTERVAL_DAYS: i64 = 3_660;

fn star() -> String {
    "*".to_string()
}

/// Crontab fields. Day-of-week numbers follow the 0 = Sunday convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabSpec {
    #[serde(default = "star")]
    pub minute: String,
    #[serde(default = "star")]
    pub hour: String,
    #[serde(default = "star")]
    pub day_of_week: String,
    #[serde(default = "star")]
    pub day_of_month: String,
    #[serde(default = "star")]
    pub month_of_year: String,
}

impl Default for CrontabSpec {
    fn default() -> Self {
        Self {
            minute: star(),
            hour: star(),
            day_of_week: star(),
            day_of_month: star(),
            month_of_year: star(),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

impl CrontabSpec {
    /// Render as a six-field expression (with a leading seconds field) for
    /// the `cron` crate.
    pub fn to_cron_expression(&self) -> String {
        format!(
            "0 {} {} {} {} {}",
            self.minute,
            self.hour,
            self.day_of_month,
            self.month_of_year,
            normalize_day_of_week(&self.day_of_week)
        )
    }

    pub fn parse(&self) -> Result<cron::Schedule, cron::error::Error> {
        cron::Schedule::from_str(&self.to_cron_expression())
    }
}

/// Translate numeric weekdays (0-6, Sunday first) to names so the field
/// cannot be misread by a parser with a different numbering.
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            part.split('-')
                .map(|token| match token.parse::<usize>() {
                    Ok(n) if n < 7 => WEEKDAYS[n].to_string(),
                    Ok(7) => WEEKDAYS[0].to_string(),
                    _ => token.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Interval-vs-crontab discriminator plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleKind {
    Interval { every: u32, period: PeriodUnit },
    Crontab(CrontabSpec),
}

/// Write state of the ledger row relative to the scheduler store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    /// Ledger row written, scheduler store entry not yet confirmed.
    Pending,
    Committed,
}

impl ScheduleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

/// A recurring extraction owned by a user.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub submission_date: DateTime<Utc>,
    pub args: RequestArgs,
    pub kind: ScheduleKind,
    pub on_data_ready: bool,
    pub enabled: bool,
    pub state: ScheduleState,
}

impl Schedule {
    /// Name of the matching scheduler store entry.
    pub fn entry_name(&self) -> String {
        format!("schedule-{}-{}", self.id, self.name)
    }
}
