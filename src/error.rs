//! Error taxonomy for the gateway.
//!
//! Every failure in the system is classified into exactly one variant. The
//! classification carries through the retry and circuit-breaker layers: the
//! queue facade inspects [`Error::is_retryable`] to choose between retry and
//! terminal failure, and [`Error::code`] is the stable `family/name` string
//! stored on jobs and returned to webhook callers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Inbound webhook signature did not match the shared secret.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The exchange rejected our API credentials.
    #[error("exchange rejected credentials: {0}")]
    CredentialsInvalid(String),

    /// Our own ingress rate limit was exhausted.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The exchange asked us to back off (HTTP 429).
    #[error("exchange throttled request: {0}")]
    ExchangeThrottled(String),

    /// No webhook exists for the requested URL path.
    #[error("unknown webhook path: {0}")]
    WebhookNotFound(String),

    /// The webhook exists but is paused or disabled.
    #[error("webhook is not active: {0}")]
    WebhookInactive(String),

    /// The inbound payload could not be validated into an alert.
    #[error("invalid alert payload: {0}")]
    InvalidPayload(String),

    /// No exchange account could be resolved for the alert.
    #[error("no account resolvable: {0}")]
    NoAccount(String),

    /// The target account is deactivated.
    #[error("account is inactive: {0}")]
    AccountInactive(String),

    /// The account references an exchange tag we do not support.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// Sizing produced a non-positive quantity or no size was specified.
    #[error("invalid order size: {0}")]
    InvalidSize(String),

    /// The balance guard rejected the submission.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Every source in the price fallback chain failed.
    #[error("no price source available for {0}")]
    PriceFeedUnavailable(String),

    /// Transient exchange failure: 5xx, network error, or timeout.
    #[error("transient exchange error: {0}")]
    ExchangeTransient(String),

    /// The exchange rejected the request for a business reason.
    #[error("exchange rejected request: {0}")]
    ExchangeLogical(String),

    /// A circuit breaker is open for the named key.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Configuration error surfaced during load or validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential vault failure (bad key, malformed ciphertext, AEAD failure).
    #[error("vault error: {0}")]
    Vault(String),

    /// Database statement failure.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection/pool failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Queue facade failure.
    #[error("queue error: {0}")]
    Queue(String),

    /// Value could not be parsed into its domain representation.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that escaped classification.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy code stored on failed jobs and returned to callers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "auth/signature_invalid",
            Self::CredentialsInvalid(_) => "auth/credentials_invalid",
            Self::RateLimited { .. } => "rate/limit_exceeded",
            Self::ExchangeThrottled(_) => "rate/exchange_throttled",
            Self::WebhookNotFound(_) => "config/unknown_webhook",
            Self::WebhookInactive(_) => "config/webhook_inactive",
            Self::InvalidPayload(_) => "config/invalid_payload",
            Self::NoAccount(_) => "config/no_account",
            Self::AccountInactive(_) => "config/account_inactive",
            Self::UnsupportedExchange(_) => "config/unsupported_exchange",
            Self::InvalidSize(_) => "config/invalid_size",
            Self::InsufficientFunds(_) => "funds/insufficient",
            Self::PriceFeedUnavailable(_) => "price/feed_unavailable",
            Self::ExchangeTransient(_) => "exchange/transient",
            Self::ExchangeLogical(_) => "exchange/logical",
            Self::CircuitOpen(_) => "circuit/open",
            Self::Config(_) => "config/invalid",
            Self::Vault(_) => "internal/vault",
            Self::Database(_) => "internal/database",
            Self::Connection(_) => "internal/connection",
            Self::Queue(_) => "internal/queue",
            Self::Parse(_) => "internal/parse",
            Self::Json(_) => "internal/json",
            Self::Io(_) => "internal/io",
            Self::Internal(_) => "internal/unclassified",
        }
    }

    /// True when another attempt may succeed without operator action.
    ///
    /// The queue facade consults this when a worker reports failure:
    /// retryable errors are rescheduled with backoff, everything else fails
    /// the job terminally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExchangeThrottled(_)
            | Self::ExchangeTransient(_)
            | Self::CircuitOpen(_)
            | Self::PriceFeedUnavailable(_) => true,
            // Infrastructure hiccups are worth a bounded retry.
            Self::Database(_) | Self::Connection(_) | Self::Queue(_) | Self::Io(_) => true,
            Self::Internal(_) => true,
            _ => false,
        }
    }

    /// Short string stored on a job's `last_error` on terminal failure.
    #[must_use]
    pub fn job_error(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
