//! HTTP surface tests: ingress status codes and the health report.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use harness::TestHarness;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tradehook::adapter::inbound::http::health::HealthState;
use tradehook::adapter::inbound::http::server::build_router;
use tradehook::adapter::inbound::http::webhook::SIGNATURE_HEADER;
use tradehook::application::intake::signature;
use tradehook::domain::account::Exchange;
use tradehook::port::outbound::queue::JobQueue;
use tradehook::testkit::exchange::{MockAdapterFactory, MockExchange};

const BUY_ALERT: &[u8] = br#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1"}"#;

fn router(harness: &TestHarness) -> axum::Router {
    let health_state = Arc::new(HealthState {
        pool: harness.pool().clone(),
        queue: harness.queue.clone() as Arc<dyn JobQueue>,
        adapters: Arc::new(MockAdapterFactory::new(Arc::clone(&harness.exchange))),
        probe_exchanges: vec![Exchange::Binance],
        memory_limit_mb: 8192,
        store_timeout: Duration::from_secs(5),
    });
    build_router(Arc::new(harness.intake()), health_state)
}

fn post(path: &str, body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn accepted_and_duplicate_deliveries_return_200() {
    let harness = TestHarness::create("http-accept");
    harness.seed_standard().await;
    let app = router(&harness);
    let header = signature::sign("topsecret", BUY_ALERT);

    let response = app
        .clone()
        .oneshot(post("/webhook/tv/hook-1", BUY_ALERT, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["alert_id"], "A1");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(post("/webhook/tv/hook-1", BUY_ALERT, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["duplicate"], true);
    assert_eq!(body["job_id"], job_id.as_str());
}

#[tokio::test]
async fn signature_failure_is_401_with_taxonomy_code() {
    let harness = TestHarness::create("http-401");
    harness.seed_standard().await;
    let app = router(&harness);

    let response = app
        .oneshot(post("/webhook/tv/hook-1", BUY_ALERT, Some("sha256=deadbeef")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "auth/signature_invalid");
}

#[tokio::test]
async fn unknown_webhook_is_404() {
    let harness = TestHarness::create("http-404");
    harness.seed_standard().await;
    let app = router(&harness);

    let response = app
        .oneshot(post("/webhook/tv/missing", BUY_ALERT, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_payload_is_400() {
    let harness = TestHarness::create("http-400");
    harness.seed_standard().await;
    let app = router(&harness);

    let bad = br#"{"action":"buy"}"#;
    let header = signature::sign("topsecret", bad);
    let response = app
        .oneshot(post("/webhook/tv/hook-1", bad, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "config/invalid_payload");
}

#[tokio::test]
async fn rate_limited_delivery_is_429_with_retry_after() {
    let harness = TestHarness::create("http-429");
    harness.seed_user("user-1");
    harness
        .seed_account(&tradehook::testkit::fixtures::account("acct-1", "user-1"))
        .await;
    let mut webhook = tradehook::testkit::fixtures::webhook("wh-1", "user-1", "hook-1", "topsecret");
    webhook.rate_policy.max_per_minute = 1;
    harness.seed_webhook(&webhook).await;
    let app = router(&harness);
    let header = signature::sign("topsecret", BUY_ALERT);

    let response = app
        .clone()
        .oneshot(post("/webhook/tv/hook-1", BUY_ALERT, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let second = br#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A2"}"#;
    let header2 = signature::sign("topsecret", second);
    let response = app
        .oneshot(post("/webhook/tv/hook-1", second, Some(&header2)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = json_body(response).await;
    assert_eq!(body["code"], "rate/limit_exceeded");
}

#[tokio::test]
async fn health_reports_per_probe_status() {
    let harness = TestHarness::create("http-health");
    harness.seed_standard().await;
    let app = router(&harness);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    let names: Vec<&str> = body["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"database"));
    assert!(names.contains(&"queue"));
    assert!(names.contains(&"memory"));
    assert!(names.contains(&"exchange_binance"));
}
