//! End-to-end exercise of the `/eval` route through axum's `Router`
//! directly (no real TCP socket) — driving the stack through its real
//! entry point rather than calling handlers in isolation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use evalsrv_api::build_router;
use evalsrv_core::Config;
use evalsrv_net::OutboundBridge;
use evalsrv_queue::AdmissionQueue;
use evalsrv_runtime::{DefaultExtensions, EvalEngine, IsolateRunner};

fn test_config() -> Config {
    Config {
        auth_secret: "s3cr3t-token".to_string(),
        ..Config::default()
    }
}

fn test_router() -> axum::Router {
    let config = test_config();
    let engine = EvalEngine::new();
    let bridge = Arc::new(OutboundBridge::new(config.max_fetch_concurrency).unwrap());
    let runner = IsolateRunner::new(engine, bridge, Arc::new(DefaultExtensions));
    let queue = AdmissionQueue::new(runner, config.queue_capacity);
    build_router(queue, &config)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn eval_simple_expression_returns_200() {
    let router = test_router();
    let request = Request::post("/eval")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer s3cr3t-token")
        .body(Body::from(json!({"code": "1 + 1", "msg": {}}).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"][0], "2");
    assert_eq!(body["statusCode"], 200);
}

#[tokio::test]
async fn eval_wrong_token_returns_418() {
    let router = test_router();
    let request = Request::post("/eval")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer totally-wrong")
        .body(Body::from(json!({"code": "1 + 1", "msg": {}}).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = body_json(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["errors"][0]["message"], "not today my little bish xqcL");
}

#[tokio::test]
async fn eval_missing_auth_header_returns_418() {
    let router = test_router();
    let request = Request::post("/eval")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"code": "1 + 1", "msg": {}}).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let router = test_router();
    let request = Request::get("/healthz").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_reports_ready_when_under_capacity() {
    let router = test_router();
    let request = Request::get("/readyz").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn thrown_guest_error_still_returns_200_with_sentinel() {
    let router = test_router();
    let request = Request::post("/eval")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer s3cr3t-token")
        .body(Body::from(
            json!({"code": "throw new TypeError('x')", "msg": {}}).to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"][0], "🚫 TypeError: x");
}
