//! Trigger translation: frequency + time config → fire-time computation.
//!
//! Most frequencies compile to a cron expression parsed by the `cron`
//! crate. "Monthly on day ≥ 28" cannot — the cron grammar has no
//! last-day-of-month symbol — so it becomes a first-class variant whose
//! next-fire time is derived from the calendar directly. The coercion
//! itself lives in the kernel (`coerce_monthly_day`) and is shared with
//! validation.

use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use cron::Schedule as CronSchedule;

use cookiescan_kernel::model::schedule::{
    coerce_monthly_day, normalize_day_of_week, Frequency, MonthlyDay, ScheduleValidationError,
    TimeConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error(transparent)]
    Validation(#[from] ScheduleValidationError),

    #[error("invalid cron expression '{expr}': {message}")]
    Cron { expr: String, message: String },
}

/// A compiled trigger.
#[derive(Debug, Clone)]
pub enum TriggerSpec {
    Cron(CronSchedule),
    /// Fires at `hour:minute` on the last calendar day of every month.
    MonthlyLastDay { hour: u32, minute: u32 },
}

impl TriggerSpec {
    /// Build a trigger from a schedule's frequency and time config.
    /// Validates the config first, so dispatcher callers get data-invariant
    /// failures here rather than at fire time.
    pub fn from_schedule(frequency: Frequency, tc: &TimeConfig) -> Result<Self, TriggerError> {
        tc.validate(frequency)?;

        let expr = match frequency {
            Frequency::Hourly => {
                format!("0 {} * * * *", tc.minute.unwrap_or(0))
            }
            Frequency::Daily => {
                format!("0 {} {} * * *", tc.minute.unwrap_or(0), tc.hour.unwrap_or(0))
            }
            Frequency::Weekly => {
                let raw = tc.weekly_day().expect("validated weekly config has a day");
                let dow = normalize_day_of_week(&raw).expect("validated day name");
                format!(
                    "0 {} {} * * {}",
                    tc.minute.unwrap_or(0),
                    tc.hour.unwrap_or(0),
                    dow
                )
            }
            Frequency::Monthly => {
                let day = tc.monthly_day().expect("validated monthly config has a day");
                match coerce_monthly_day(day) {
                    MonthlyDay::Last => {
                        return Ok(TriggerSpec::MonthlyLastDay {
                            hour: tc.hour.unwrap_or(0),
                            minute: tc.minute.unwrap_or(0),
                        });
                    }
                    MonthlyDay::Day(day) => {
                        format!(
                            "0 {} {} {} * *",
                            tc.minute.unwrap_or(0),
                            tc.hour.unwrap_or(0),
                            day
                        )
                    }
                }
            }
            Frequency::Custom => {
                let raw = tc.cron.as_deref().expect("validated custom config has cron");
                normalize_custom_expr(raw)
            }
        };

        let schedule = CronSchedule::from_str(&expr).map_err(|e| TriggerError::Cron {
            expr: expr.clone(),
            message: e.to_string(),
        })?;
        Ok(TriggerSpec::Cron(schedule))
    }

    /// The next fire time strictly after `after`, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSpec::Cron(schedule) => schedule.after(&after).next(),
            TriggerSpec::MonthlyLastDay { hour, minute } => {
                next_monthly_last_day(after, *hour, *minute)
            }
        }
    }
}

/// Accept 5-field (minute-resolution) custom expressions by prepending a
/// seconds field; 6- and 7-field expressions pass through.
fn normalize_custom_expr(raw: &str) -> String {
    let fields = raw.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", raw.trim())
    } else {
        raw.trim().to_string()
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn next_monthly_last_day(after: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let mut year = after.year();
    let mut month = after.month();

    // At most 13 candidates: this month's last day, then forward.
    for _ in 0..14 {
        let day = last_day_of_month(year, month);
        if let Some(candidate) = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .and_then(|naive| Utc.from_local_datetime(&naive).single())
        {
            if candidate > after {
                return Some(candidate);
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    None
}
