//! Outbound event publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Event published on the `account_updates` channel after each successful
/// reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    /// Always `"account_update"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub account_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AccountUpdate {
    #[must_use]
    pub fn new(account_id: &str, user_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            event_type: "account_update".to_string(),
            account_id: account_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: at,
        }
    }
}

/// Publisher for the shared pub/sub channel.
///
/// Publication is best-effort with at-most-once delivery; callers log
/// failures and continue.
pub trait EventPublisher: Send + Sync {
    /// Publish an account update. A failed publish must not fail the
    /// reconciliation cycle that produced it.
    fn publish(&self, event: AccountUpdate) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_channel_contract() {
        let event = AccountUpdate::new("acct-1", "user-1", Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "account_update");
        assert_eq!(json["accountId"], "acct-1");
        assert_eq!(json["userId"], "user-1");
        assert!(json["timestamp"].is_string());
    }
}
