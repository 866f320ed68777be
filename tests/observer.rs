//! Log observer endpoint tests

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use beacon_rag::config::TelemetryConfig;
use beacon_rag::observer::LogObserver;
use beacon_rag::{Level, Telemetry};

fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/logs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ingest_broadcasts_entry() {
    let observer = LogObserver::new();
    let mut rx = observer.subscribe();

    let response = observer
        .router()
        .oneshot(post(r#"{"level":"WARNING","message":"greeting failed"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({"success": true}));

    let entry = rx.try_recv().unwrap();
    assert_eq!(entry.level, "WARNING");
    assert_eq!(entry.message, "greeting failed");
}

#[tokio::test]
async fn invalid_body_is_rejected() {
    let observer = LogObserver::new();
    let mut rx = observer.subscribe();

    for body in ["not json", r#"{"level":"INFO"}"#, "[]"] {
        let response = observer.router().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Invalid request"})
        );
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn stream_opens_as_event_stream() {
    let observer = LogObserver::new();
    let response = observer
        .router()
        .oneshot(Request::builder().uri("/api/logs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
}

#[tokio::test]
async fn telemetry_reports_reach_observer() {
    let observer = LogObserver::new();
    let mut rx = observer.subscribe();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = observer.router();
    drop(tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    }));

    let telemetry = Telemetry::new(&TelemetryConfig {
        enabled: true,
        url: format!("http://{addr}/api/logs"),
        timeout: Duration::from_secs(2),
    });
    telemetry.report(Level::Info, "RAG enabled: true").await.unwrap();

    let entry = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.level, "INFO");
    assert_eq!(entry.message, "RAG enabled: true");
}
