//! HTTP server assembly and lifecycle.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tracing::info;

use super::health::{health, HealthState};
use super::webhook::receive_alert;
use crate::application::intake::service::IntakeService;
use crate::error::{Error, Result};
use crate::port::outbound::store::{AccountStore, JobStore, WebhookStore};

/// Assemble the ingress router.
pub fn build_router<WS, JS, AS>(
    intake: Arc<IntakeService<WS, JS, AS>>,
    health_state: Arc<HealthState>,
) -> Router
where
    WS: WebhookStore + Send + Sync + 'static,
    JS: JobStore + Send + Sync + 'static,
    AS: AccountStore + Send + Sync + 'static,
{
    let webhook_routes = Router::new()
        .route("/webhook/tv/:url_path", post(receive_alert::<WS, JS, AS>))
        .with_state(intake);
    let health_routes = Router::new()
        .route("/health", get(health))
        .with_state(health_state);

    webhook_routes.merge(health_routes)
}

/// Serve until the shutdown signal flips.
pub async fn serve(bind: String, router: Router, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {bind}: {e}")))?;
    info!(bind = %bind, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))
}
