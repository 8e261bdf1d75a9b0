//! Domain fixtures shared by integration tests.

use chrono::Utc;

use crate::domain::account::{Credentials, Exchange, ExchangeAccount};
use crate::domain::webhook::{RatePolicy, Webhook, WebhookStatus};
use crate::infrastructure::vault::Vault;

/// A vault with a fixed test key.
#[must_use]
pub fn vault() -> Vault {
    Vault::new(&[7u8; 32]).expect("test vault")
}

/// Plaintext API credentials.
#[must_use]
pub fn credentials() -> Credentials {
    Credentials {
        api_key: "test-api-key".into(),
        api_secret: "test-api-secret".into(),
        passphrase: None,
    }
}

/// An active primary binance account whose credentials are encrypted under
/// [`vault`].
#[must_use]
pub fn account(id: &str, user_id: &str) -> ExchangeAccount {
    let enc = vault()
        .encrypt_credentials(&credentials())
        .expect("encrypt test credentials");
    let now = Utc::now();
    ExchangeAccount {
        id: id.to_string(),
        user_id: user_id.to_string(),
        name: "main".into(),
        exchange: Exchange::Binance,
        testnet: false,
        active: true,
        is_primary: true,
        api_key_enc: enc.api_key,
        api_secret_enc: enc.api_secret,
        passphrase_enc: enc.passphrase,
        created_at: now,
        updated_at: now,
    }
}

/// An active signed webhook.
#[must_use]
pub fn webhook(id: &str, user_id: &str, url_path: &str, secret: &str) -> Webhook {
    let now = Utc::now();
    Webhook {
        id: id.to_string(),
        user_id: user_id.to_string(),
        url_path: url_path.to_string(),
        secret: secret.to_string(),
        is_public: false,
        status: WebhookStatus::Active,
        rate_policy: RatePolicy {
            max_per_minute: 60,
            max_per_hour: 600,
        },
        error_threshold: 3,
        consecutive_errors: 0,
        deliveries_total: 0,
        deliveries_failed: 0,
        created_at: now,
        updated_at: now,
    }
}
