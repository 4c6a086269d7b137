//! HTTP submission endpoint behavior through the router

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use xssprobe::server::app;
use xssprobe::session::SessionManager;

fn submit_body(response: &str, url: &str, payload: &str) -> Value {
    json!({
        "httpResponse": BASE64.encode(response),
        "httpUrl": BASE64.encode(url),
        "payload": BASE64.encode(payload),
        "browser": "chromium",
    })
}

async fn post(router: axum::Router, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::post("/")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn executed_script_reflection_reports_200_high_confidence() {
    let router = app(Arc::new(SessionManager::new()));
    let (status, body) = post(
        router,
        submit_body(
            "<html><p><script>alert(1)</script></p></html>",
            "http://t.example/?q=x",
            "<script>alert(1)</script>",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 1);
    assert_eq!(body["enhanced"]["executed"], true);
    assert_eq!(body["enhanced"]["severity"], "high");
    assert!(body["enhanced"]["confidence"].as_f64().unwrap() >= 0.9);
    assert!(
        body["enhanced"]["detectionMethods"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m == "reflection")
    );
}

#[tokio::test]
async fn clean_response_reports_201() {
    let router = app(Arc::new(SessionManager::new()));
    let (status, body) = post(
        router,
        submit_body(
            "<html><p>nothing injected</p></html>",
            "http://t.example/",
            "<svg onload=alert(1)>",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["value"], 0);
    assert_eq!(body["enhanced"]["detected"], false);
    assert_eq!(body["enhanced"]["severity"], "none");
}

#[tokio::test]
async fn invalid_base64_is_a_validation_error() {
    let router = app(Arc::new(SessionManager::new()));
    let (status, body) = post(
        router,
        json!({
            "httpResponse": "!!not base64!!",
            "httpUrl": BASE64.encode("http://t.example/"),
            "payload": BASE64.encode("<b>x</b>"),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["value"], 0);
    assert!(body["msg"].as_str().unwrap().contains("httpResponse"));
}

#[tokio::test]
async fn unknown_browser_is_rejected() {
    let router = app(Arc::new(SessionManager::new()));
    let mut body = submit_body("<p>x</p>", "http://t.example/", "x");
    body["browser"] = json!("netscape");
    let (status, _) = post(router, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let router = app(Arc::new(SessionManager::new()));

    let health = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(health.into_body(), usize::MAX).await.unwrap();
    let doc: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(doc["status"], "ok");
    assert!(doc["maxConcurrentPages"].as_u64().unwrap() > 0);
    assert!(doc.get("browserPool").is_some());
    assert!(doc["metrics"].get("successRate").is_some());

    let metrics = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}
