//! Webhook ingress handler: `POST /webhook/tv/{urlPath}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::application::intake::service::{IntakeOutcome, IntakeService};
use crate::error::Error;
use crate::port::outbound::store::{AccountStore, JobStore, WebhookStore};

/// Header carrying the `sha256=<hex>` signature.
pub const SIGNATURE_HEADER: &str = "x-tradingview-signature";

/// Map a taxonomy classification onto an ingress status code.
fn http_status(err: &Error) -> StatusCode {
    match err {
        Error::SignatureInvalid => StatusCode::UNAUTHORIZED,
        Error::WebhookNotFound(_) => StatusCode::NOT_FOUND,
        Error::WebhookInactive(_) => StatusCode::FORBIDDEN,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::InvalidPayload(_) | Error::NoAccount(_) | Error::UnsupportedExchange(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn receive_alert<WS, JS, AS>(
    State(intake): State<Arc<IntakeService<WS, JS, AS>>>,
    Path(url_path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    WS: WebhookStore + Send + Sync + 'static,
    JS: JobStore + Send + Sync + 'static,
    AS: AccountStore + Send + Sync + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match intake.ingest(&url_path, &body, signature).await {
        Ok(IntakeOutcome::Accepted { job_id, alert_id }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "alert_id": alert_id,
                "job_id": job_id,
            })),
        )
            .into_response(),
        Ok(IntakeOutcome::Duplicate { job_id, alert_id }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "duplicate": true,
                "alert_id": alert_id,
                "job_id": job_id,
            })),
        )
            .into_response(),
        Err(err) => {
            let status = http_status(&err);
            if status.is_server_error() {
                error!(url_path = %url_path, error = %err, "Ingress failed");
            }
            let mut response = (
                status,
                Json(json!({
                    "success": false,
                    "code": err.code(),
                    "error": err.to_string(),
                })),
            )
                .into_response();
            if let Error::RateLimited { retry_after_secs } = err {
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_contract() {
        assert_eq!(http_status(&Error::SignatureInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(
            http_status(&Error::WebhookNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            http_status(&Error::RateLimited { retry_after_secs: 5 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            http_status(&Error::InvalidPayload("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_status(&Error::NoAccount("none".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_status(&Error::Database("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
