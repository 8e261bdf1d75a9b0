//! Shared REST plumbing for exchange adapters.
//!
//! Owns the HTTP client, the per-request timeout, and the classification of
//! transport and status-code failures into the error taxonomy. Adapters add
//! their own signing on top and never retry here.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// Thin wrapper over `reqwest` with venue-agnostic error classification.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and return the response body.
    ///
    /// Non-success statuses and transport failures come back classified;
    /// callers only ever see taxonomy errors.
    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &[(&str, String)],
        body: Option<String>,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut builder = self.http.request(method, &url);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(classify_status(status, &text))
        }
    }

    pub async fn get(&self, path_and_query: &str, headers: &[(&str, String)]) -> Result<String> {
        self.request(Method::GET, path_and_query, headers, None).await
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    Error::ExchangeTransient(if err.is_timeout() {
        "request timed out".to_string()
    } else {
        format!("transport failure: {err}")
    })
}

/// Map an HTTP status plus body snippet into the taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::CredentialsInvalid(snippet),
        StatusCode::TOO_MANY_REQUESTS => Error::ExchangeThrottled(snippet),
        s if s.is_server_error() => Error::ExchangeTransient(format!("{s}: {snippet}")),
        s => Error::ExchangeLogical(format!("{s}: {snippet}")),
    }
}

/// Decode a JSON response body; malformed payloads are treated as a
/// transient venue glitch.
pub fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| Error::ExchangeTransient(format!("malformed response: {e}")))
}

/// Parse a decimal the venue sent as a string; empty means zero.
pub fn dec_field(value: &str, field: &str) -> Result<Decimal> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(value)
        .map_err(|e| Error::ExchangeTransient(format!("bad decimal in {field}: {e}")))
}

/// Parse an epoch-milliseconds timestamp the venue sent as a string.
pub fn ms_field(value: &str, field: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = value
        .trim()
        .parse()
        .map_err(|_| Error::ExchangeTransient(format!("bad timestamp in {field}: {value:?}")))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::ExchangeTransient(format!("timestamp out of range in {field}")))
}

/// Current epoch milliseconds as a string, for request signing.
#[must_use]
pub fn now_millis() -> String {
    Utc::now().timestamp_millis().to_string()
}
