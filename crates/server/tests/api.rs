//! HTTP surface tests: OTLP/HTTP ingest and the JSON read API, exercised
//! through the router without a network listener.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use prost::Message;
use tower::ServiceExt;
use tracedb_server::config::Config;
use tracedb_server::http::{router, AppState, ServerInfo};
use tracedb_store::TraceStore;

fn test_router() -> (tempfile::TempDir, Arc<TraceStore>, Router) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TraceStore::open(dir.path().join("traces.db"), 60).expect("open store"));
    let config = Config::for_test(dir.path().to_path_buf());
    let app = router(AppState {
        store: Arc::clone(&store),
        info: ServerInfo::from_config(&config),
    });
    (dir, store, app)
}

fn service_name_kv(name: &str) -> KeyValue {
    KeyValue {
        key: "service.name".to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(name.to_string())),
        }),
    }
}

fn sample_span(trace: u8, id: u8) -> Span {
    let start = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
    let nanos = start.timestamp_nanos_opt().unwrap() as u64;
    Span {
        trace_id: vec![trace; 16],
        span_id: vec![id; 8],
        name: format!("op-{id}"),
        start_time_unix_nano: nanos + id as u64 * 1_000_000_000,
        end_time_unix_nano: nanos + id as u64 * 1_000_000_000 + 500_000,
        ..Default::default()
    }
}

fn export_body(service: &str, spans: Vec<Span>) -> Vec<u8> {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(Resource {
                attributes: vec![service_name_kv(service)],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
    .encode_to_vec()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn otlp_http_export_persists_spans() {
    let (_dir, store, app) = test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(export_body("http-svc", vec![sample_span(1, 1)])))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get_spans("http-svc", 10).expect("spans").len(), 1);
}

#[tokio::test]
async fn otlp_http_rejects_wrong_content_type() {
    let (_dir, _store, app) = test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn spans_endpoint_returns_newest_first() {
    let (_dir, store, app) = test_router();

    let batch = export_body("api-svc", vec![sample_span(1, 1), sample_span(1, 2)]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(batch))
        .expect("request");
    app.clone().oneshot(request).await.expect("export");
    assert_eq!(store.get_spans("api-svc", 10).expect("spans").len(), 2);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/spans?service=api-svc&limit=10")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["service"], "api-svc");
    let spans = body["spans"].as_array().expect("spans array");
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0]["span_id"], "02".repeat(8));
    assert_eq!(spans[1]["span_id"], "01".repeat(8));
}

#[tokio::test]
async fn services_and_stats_endpoints_report_the_service() {
    let (_dir, _store, app) = test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(export_body("stats-svc", vec![sample_span(3, 1)])))
        .expect("request");
    app.clone().oneshot(request).await.expect("export");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/services").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let body = json_body(response).await;
    assert_eq!(body[0]["name"], "stats-svc");
    assert_eq!(body[0]["span_count"], 1);

    let response = app
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let body = json_body(response).await;
    assert_eq!(body["config"]["retention_days"], 60);
    assert_eq!(body["services"][0]["service"], "stats-svc");
    assert_eq!(body["services"][0]["months"][0]["month"], "2024-07");
}

#[tokio::test]
async fn unknown_trace_is_404_and_bad_ids_are_400() {
    let (_dir, _store, app) = test_router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/trace/{}", "00".repeat(16)))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/trace/zz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Well-formed hex of the wrong length is rejected by the store.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/spantree/abcd").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/spantree/{}", "ee".repeat(8)))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn span_tree_endpoint_returns_the_window() {
    let (_dir, _store, app) = test_router();

    let body = export_body("tree-svc", vec![sample_span(9, 1), sample_span(9, 2)]);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(body))
        .expect("request");
    app.clone().oneshot(request).await.expect("export");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/spantree/{}", "01".repeat(8)))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["trace_id"], "09".repeat(16));
    assert_eq!(body["spans"].as_array().expect("spans").len(), 2);
}

#[tokio::test]
async fn delete_endpoint_purges_the_service() {
    let (_dir, store, app) = test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/traces")
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(export_body("doomed-svc", vec![sample_span(5, 1)])))
        .expect("request");
    app.clone().oneshot(request).await.expect("export");
    assert_eq!(store.get_spans("doomed-svc", 10).expect("spans").len(), 1);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/services/doomed-svc")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(store.get_spans("doomed-svc", 10).expect("spans").is_empty());
}
