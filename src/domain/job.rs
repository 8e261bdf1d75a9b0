//! Durable execution commitments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for states the worker must not re-execute.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A durable commitment to execute one alert.
///
/// Exactly one job exists per alert identifier; re-delivery of the same
/// alert returns the existing job and creates nothing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// Deduplication key: unique across the job table.
    pub alert_id: String,
    pub webhook_id: String,
    pub account_id: Option<String>,
    pub user_id: String,
    /// Verbatim alert payload as received (unknown fields included).
    pub payload: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
