//! Signed ingress endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Webhook lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Active,
    Paused,
    Disabled,
    Error,
}

impl WebhookStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "disabled" => Ok(Self::Disabled),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown webhook status: {other}")),
        }
    }
}

/// Ingress rate-limit policy: both windows are enforced, the more
/// restrictive wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            max_per_minute: 60,
            max_per_hour: 600,
        }
    }
}

/// A signed ingress endpoint owned by one user.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: String,
    pub user_id: String,
    /// Unique URL path segment: `POST /webhook/tv/{url_path}`.
    pub url_path: String,
    /// Shared secret for HMAC signature verification.
    pub secret: String,
    /// Public webhooks accept unsigned requests; a supplied signature must
    /// still match.
    pub is_public: bool,
    pub status: WebhookStatus,
    pub rate_policy: RatePolicy,
    /// Consecutive failures beyond this threshold auto-pause the webhook.
    pub error_threshold: u32,
    pub consecutive_errors: u32,
    pub deliveries_total: u64,
    pub deliveries_failed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// True when the webhook accepts deliveries.
    #[must_use]
    pub const fn accepts_deliveries(&self) -> bool {
        matches!(self.status, WebhookStatus::Active)
    }

    /// True when one more consecutive error would cross the auto-pause
    /// threshold.
    #[must_use]
    pub const fn at_error_threshold(&self) -> bool {
        self.consecutive_errors >= self.error_threshold
    }
}
