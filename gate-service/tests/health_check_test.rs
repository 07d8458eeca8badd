mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestApp;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["service"], "gate-service");
}

#[tokio::test]
async fn test_responses_carry_request_id_and_security_headers() {
    let app = TestApp::new();

    let req = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;

    assert_eq!(res.headers["x-request-id"], "req-42");
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
    assert_eq!(res.headers["x-frame-options"], "DENY");
}

#[tokio::test]
async fn test_rejections_also_carry_security_headers() {
    let app = TestApp::new();

    let res = app.post_form("/invite", "email=a@x.com", None).await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(res.headers.contains_key("x-request-id"));
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_metrics_route_without_recorder_is_empty() {
    let app = TestApp::new();

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;

    assert_eq!(res.status, StatusCode::OK);
}
