//! Users and credential-scoped exchange accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Supported exchange platforms.
///
/// Determines which exchange adapter executes orders for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
    Coinbase,
    Bitget,
}

impl Exchange {
    /// Lowercase tag as it appears in alert payloads and breaker keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
            Self::Coinbase => "coinbase",
            Self::Bitget => "bitget",
        }
    }

    /// All supported exchange tags.
    pub const ALL: [Exchange; 5] = [
        Self::Binance,
        Self::Bybit,
        Self::Okx,
        Self::Coinbase,
        Self::Bitget,
    ];
}

impl std::str::FromStr for Exchange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "okx" => Ok(Self::Okx),
            "coinbase" => Ok(Self::Coinbase),
            "bitget" => Ok(Self::Bitget),
            other => Err(Error::UnsupportedExchange(other.to_string())),
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity envelope owning accounts, webhooks, and jobs.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub active: bool,
}

/// A credential-scoped trading identity at one exchange.
///
/// Credentials are stored encrypted; the vault decrypts them just before an
/// adapter is constructed. Accounts that have produced orders are
/// deactivated rather than deleted.
#[derive(Debug, Clone)]
pub struct ExchangeAccount {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub exchange: Exchange,
    pub testnet: bool,
    pub active: bool,
    /// At most one primary account per (owner, exchange) pair.
    pub is_primary: bool,
    pub api_key_enc: String,
    pub api_secret_enc: String,
    pub passphrase_enc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted API credentials.
///
/// Zeroized on drop; never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn exchange_tags_roundtrip() {
        for exchange in Exchange::ALL {
            assert_eq!(Exchange::from_str(exchange.as_str()).unwrap(), exchange);
        }
    }

    #[test]
    fn unknown_exchange_is_classified() {
        let err = Exchange::from_str("kraken").unwrap_err();
        assert_eq!(err.code(), "config/unsupported_exchange");
    }

    #[test]
    fn credentials_debug_never_prints_secrets() {
        let creds = Credentials {
            api_key: "key-material".into(),
            api_secret: "secret-material".into(),
            passphrase: Some("phrase".into()),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("key-material"));
        assert!(!rendered.contains("secret-material"));
        assert!(!rendered.contains("phrase"));
    }
}
