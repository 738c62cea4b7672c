//! Schedule records and their time configuration.
//!
//! A [`Schedule`] is a recurring intent to scan one domain. Validation is
//! deliberately strict at construction/update time: a record whose
//! `time_config` does not satisfy its frequency's required fields is a
//! data-invariant error and must never reach the dispatcher. Full cron
//! *syntax* validation for custom expressions happens in the runtime at
//! trigger-install time — the kernel has no dependency on the `cron` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::scan::{ScanMode, ScanParams};

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// A caller-supplied cron expression in `time_config.cron`.
    Custom,
}

impl Frequency {
    /// Parse the lowercase wire form used by the external schedule source.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "custom" | "cron" | "custom-cron" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }
}

// ---------------------------------------------------------------------------
// TimeConfig
// ---------------------------------------------------------------------------

/// Day-of-month value after monthly coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthlyDay {
    /// A literal calendar day 1–27.
    Day(u32),
    /// The last day of whatever month is firing (covers 28/29/30/31).
    Last,
}

/// Coerce a configured monthly day into a [`MonthlyDay`].
///
/// `day >= 28` maps to "last day of the month" so that schedules configured
/// on the 29th/30th/31st still fire every month, February included. This is
/// the single place the policy lives; validation and trigger construction
/// both call it.
pub fn coerce_monthly_day(day: u32) -> MonthlyDay {
    if day >= 28 {
        MonthlyDay::Last
    } else {
        MonthlyDay::Day(day)
    }
}

/// Normalize a day-of-week name to the short title-case form the cron
/// grammar accepts. Long ("monday") and short ("mon") forms are accepted,
/// case-insensitively.
pub fn normalize_day_of_week(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sunday" | "sun" => Some("Sun"),
        "monday" | "mon" => Some("Mon"),
        "tuesday" | "tue" => Some("Tue"),
        "wednesday" | "wed" => Some("Wed"),
        "thursday" | "thu" => Some("Thu"),
        "friday" | "fri" => Some("Fri"),
        "saturday" | "sat" => Some("Sat"),
        _ => None,
    }
}

/// Frequency-specific time fields.
///
/// The external source and the database both carry this as a JSON object;
/// which fields are required depends on [`Frequency`]:
///
/// | Frequency | Required fields |
/// |-----------|-----------------|
/// | hourly    | `minute` |
/// | daily     | `hour`, `minute` |
/// | weekly    | `day_of_week` (or `day` as a name), `hour`, `minute` |
/// | monthly   | `day` (numeric), `hour`, `minute` |
/// | custom    | `cron` |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    /// Monthly: numeric day of month. Weekly: the original source also
    /// accepted the day name under this key, so both are tolerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    /// Custom cron expression (5-field minute resolution or 6-field with
    /// seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl TimeConfig {
    pub fn hourly(minute: u32) -> Self {
        Self {
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn weekly(day_of_week: impl Into<String>, hour: u32, minute: u32) -> Self {
        Self {
            day_of_week: Some(day_of_week.into()),
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn monthly(day: u32, hour: u32, minute: u32) -> Self {
        Self {
            day: Some(serde_json::json!(day)),
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        }
    }

    pub fn custom(expr: impl Into<String>) -> Self {
        Self {
            cron: Some(expr.into()),
            ..Default::default()
        }
    }

    /// The weekly day name, wherever the caller put it.
    pub fn weekly_day(&self) -> Option<String> {
        if let Some(dow) = &self.day_of_week {
            return Some(dow.clone());
        }
        match &self.day {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// The monthly day number, if present and numeric.
    pub fn monthly_day(&self) -> Option<u32> {
        match &self.day {
            Some(serde_json::Value::Number(n)) => n.as_u64().map(|d| d as u32),
            _ => None,
        }
    }

    /// Validate this config against a frequency's required fields.
    pub fn validate(&self, frequency: Frequency) -> Result<(), ScheduleValidationError> {
        let minute = || {
            self.minute
                .ok_or(ScheduleValidationError::MissingField(frequency, "minute"))
        };
        let hour = || {
            self.hour
                .ok_or(ScheduleValidationError::MissingField(frequency, "hour"))
        };

        if let Some(m) = self.minute {
            if m > 59 {
                return Err(ScheduleValidationError::FieldOutOfRange("minute", m));
            }
        }
        if let Some(h) = self.hour {
            if h > 23 {
                return Err(ScheduleValidationError::FieldOutOfRange("hour", h));
            }
        }

        match frequency {
            Frequency::Hourly => {
                minute()?;
            }
            Frequency::Daily => {
                hour()?;
                minute()?;
            }
            Frequency::Weekly => {
                let day = self
                    .weekly_day()
                    .ok_or(ScheduleValidationError::MissingField(frequency, "day_of_week"))?;
                normalize_day_of_week(&day)
                    .ok_or_else(|| ScheduleValidationError::BadDayOfWeek(day))?;
                hour()?;
                minute()?;
            }
            Frequency::Monthly => {
                let day = self
                    .monthly_day()
                    .ok_or(ScheduleValidationError::MissingField(frequency, "day"))?;
                if day == 0 || day > 31 {
                    return Err(ScheduleValidationError::FieldOutOfRange("day", day));
                }
                hour()?;
                minute()?;
            }
            Frequency::Custom => {
                let expr = self
                    .cron
                    .as_deref()
                    .ok_or(ScheduleValidationError::MissingField(frequency, "cron"))?;
                if expr.trim().is_empty() {
                    return Err(ScheduleValidationError::MissingField(frequency, "cron"));
                }
            }
        }
        Ok(())
    }
}

/// Data-invariant violations caught at schedule creation/update time.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleValidationError {
    #[error("time_config for '{}' schedules requires field '{1}'", .0.as_str())]
    MissingField(Frequency, &'static str),

    #[error("time_config field '{0}' out of range: {1}")]
    FieldOutOfRange(&'static str, u32),

    #[error("unrecognised day of week '{0}'")]
    BadDayOfWeek(String),

    #[error("unknown frequency '{0}'")]
    UnknownFrequency(String),

    #[error("domain must include a scheme, got '{0}'")]
    BadDomain(String),
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A recurring intent to scan one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique, stable identifier.
    pub schedule_id: Uuid,
    /// Opaque external correlation key.
    pub domain_config_id: String,
    /// Full URL including scheme.
    pub domain: String,
    pub scan_type: ScanMode,
    pub scan_params: ScanParams,
    pub frequency: Frequency,
    pub time_config: TimeConfig,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Validate the scheduling-relevant invariants of this record.
    pub fn validate(&self) -> Result<(), ScheduleValidationError> {
        if !self.domain.starts_with("http://") && !self.domain.starts_with("https://") {
            return Err(ScheduleValidationError::BadDomain(self.domain.clone()));
        }
        self.time_config.validate(self.frequency)
    }

    /// Hash of the scheduling-relevant subset of this record.
    ///
    /// The watcher diffs these fingerprints to detect live edits; only
    /// fields that affect trigger installation participate.
    pub fn scheduling_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let relevant = serde_json::json!({
            "domain": self.domain,
            "frequency": self.frequency,
            "time_config": self.time_config,
            "enabled": self.enabled,
            "profile_id": self.profile_id,
        });
        let mut hasher = Sha256::new();
        hasher.update(relevant.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_wire_forms() {
        assert_eq!(Frequency::parse("Daily"), Some(Frequency::Daily));
        assert_eq!(Frequency::parse("custom-cron"), Some(Frequency::Custom));
        assert_eq!(Frequency::parse("fortnightly"), None);
    }

    #[test]
    fn day_of_week_accepts_long_and_short_forms() {
        assert_eq!(normalize_day_of_week("Monday"), Some("Mon"));
        assert_eq!(normalize_day_of_week("mon"), Some("Mon"));
        assert_eq!(normalize_day_of_week("WEDNESDAY"), Some("Wed"));
        assert_eq!(normalize_day_of_week("someday"), None);
    }

    #[test]
    fn monthly_day_28_and_above_coerces_to_last() {
        assert_eq!(coerce_monthly_day(27), MonthlyDay::Day(27));
        assert_eq!(coerce_monthly_day(28), MonthlyDay::Last);
        assert_eq!(coerce_monthly_day(31), MonthlyDay::Last);
    }

    #[test]
    fn hourly_requires_minute() {
        let cfg = TimeConfig::default();
        assert!(matches!(
            cfg.validate(Frequency::Hourly),
            Err(ScheduleValidationError::MissingField(_, "minute"))
        ));
        assert!(TimeConfig::hourly(15).validate(Frequency::Hourly).is_ok());
    }

    #[test]
    fn weekly_rejects_unknown_day_name() {
        let cfg = TimeConfig::weekly("funday", 9, 0);
        assert!(matches!(
            cfg.validate(Frequency::Weekly),
            Err(ScheduleValidationError::BadDayOfWeek(_))
        ));
    }

    #[test]
    fn weekly_day_may_arrive_under_the_day_key() {
        // The external source historically sent weekly day names as `day`.
        let cfg = TimeConfig {
            day: Some(serde_json::json!("friday")),
            hour: Some(8),
            minute: Some(30),
            ..Default::default()
        };
        assert!(cfg.validate(Frequency::Weekly).is_ok());
    }

    #[test]
    fn minute_out_of_range_is_rejected() {
        let cfg = TimeConfig::daily(9, 75);
        assert_eq!(
            cfg.validate(Frequency::Daily),
            Err(ScheduleValidationError::FieldOutOfRange("minute", 75))
        );
    }

    #[test]
    fn fingerprint_changes_with_time_config_only() {
        let mut s = sample_schedule();
        let a = s.scheduling_fingerprint();
        s.last_run = Some(Utc::now());
        assert_eq!(a, s.scheduling_fingerprint(), "run metadata must not churn the fingerprint");
        s.time_config = TimeConfig::daily(10, 0);
        assert_ne!(a, s.scheduling_fingerprint());
    }

    fn sample_schedule() -> Schedule {
        Schedule {
            schedule_id: Uuid::new_v4(),
            domain_config_id: "cfg-1".into(),
            domain: "https://example.test".into(),
            scan_type: ScanMode::Quick,
            scan_params: ScanParams::default(),
            frequency: Frequency::Daily,
            time_config: TimeConfig::daily(9, 0),
            enabled: true,
            profile_id: None,
            last_run: None,
            next_run: None,
            last_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
