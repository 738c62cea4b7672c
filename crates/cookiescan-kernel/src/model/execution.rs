//! Job execution audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one job execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "started" => Some(Self::Started),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Audit record of one attempt to run one schedule.
///
/// Inserted once when the coordinator starts, updated once on completion,
/// and only deleted by the retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub execution_id: Uuid,
    pub schedule_id: Uuid,
    /// Dispatcher job id (the domain, matching trigger installation).
    pub job_id: String,
    pub domain: String,
    pub domain_config_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub scan_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl JobExecution {
    /// A fresh `started` row.
    pub fn started(
        schedule_id: Uuid,
        job_id: impl Into<String>,
        domain: impl Into<String>,
        domain_config_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            schedule_id,
            job_id: job_id.into(),
            domain: domain.into(),
            domain_config_id: domain_config_id.into(),
            status: ExecutionStatus::Started,
            started_at: now,
            completed_at: None,
            duration_seconds: None,
            scan_id: None,
            error_message: None,
            error_details: None,
            metadata: serde_json::json!({}),
        }
    }
}
