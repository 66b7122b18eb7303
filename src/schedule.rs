//! Schedule specifications.
//!
//! A task carries exactly one [`ScheduleSpec`]: either a named preset from
//! the fluent builder or a raw cron expression. Specs render to six-field
//! cron expressions (`sec min hour dom month dow`, UTC) for the trigger
//! engine; presets always fire on second zero, giving minute granularity.

use serde::{Deserialize, Serialize};

/// When a task should fire.
///
/// The last builder call wins: setting a new spec replaces the previous
/// one, it is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Every minute.
    EveryMinute,
    /// Every N minutes.
    EveryMinutes {
        /// Minute step (e.g. 5 for `*/5`).
        minutes: u32,
    },
    /// Every hour on the hour.
    Hourly,
    /// Every hour at a given minute.
    HourlyAt {
        /// Minute of hour (0-59).
        minute: u32,
    },
    /// Daily at midnight UTC.
    Daily,
    /// Daily at a given `"HH:MM"` time (UTC).
    ///
    /// The raw string is kept as written; malformed text flows into the
    /// rendered expression and is rejected by the trigger engine.
    DailyAt {
        /// Time of day as `"HH:MM"`.
        time: String,
    },
    /// Weekly on Sunday at midnight UTC.
    Weekly,
    /// Monthly on the 1st at midnight UTC.
    Monthly,
    /// Raw cron expression, passed to the trigger engine as written.
    Cron {
        /// Six-field cron expression.
        expr: String,
    },
}

impl ScheduleSpec {
    /// Render this spec as a six-field cron expression.
    #[must_use]
    pub fn cron_expr(&self) -> String {
        match self {
            Self::EveryMinute => "0 * * * * *".to_owned(),
            Self::EveryMinutes { minutes } => format!("0 */{minutes} * * * *"),
            Self::Hourly => "0 0 * * * *".to_owned(),
            Self::HourlyAt { minute } => format!("0 {minute} * * * *"),
            Self::Daily => "0 0 0 * * *".to_owned(),
            Self::DailyAt { time } => match time.split_once(':') {
                Some((hour, min)) => format!("0 {} {} * * *", min.trim(), hour.trim()),
                None => format!("0 0 {} * * *", time.trim()),
            },
            Self::Weekly => "0 0 0 * * SUN".to_owned(),
            Self::Monthly => "0 0 0 1 * *".to_owned(),
            Self::Cron { expr } => expr.clone(),
        }
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EveryMinute => write!(f, "every minute"),
            Self::EveryMinutes { minutes } => write!(f, "every {minutes} minutes"),
            Self::Hourly => write!(f, "hourly"),
            Self::HourlyAt { minute } => write!(f, "hourly at minute {minute}"),
            Self::Daily => write!(f, "daily at midnight UTC"),
            Self::DailyAt { time } => write!(f, "daily at {time} UTC"),
            Self::Weekly => write!(f, "weekly on Sunday"),
            Self::Monthly => write!(f, "monthly on the 1st"),
            Self::Cron { expr } => write!(f, "cron {expr}"),
        }
    }
}
