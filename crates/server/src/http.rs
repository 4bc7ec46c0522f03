//! axum HTTP surface: OTLP/HTTP trace ingest plus the JSON read API.
//!
//! `POST /v1/traces` accepts `application/x-protobuf` bodies (gzip handled by
//! middleware). The `/api/*` routes expose the store's read and purge
//! operations as JSON for dashboards and operators.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::decompression::RequestDecompressionLayer;
use tracedb_store::{PartitionStats, ServiceSummary, SpanSummary, SpanTree, StoreError, TraceStore};
use tracing::warn;

/// Maximum request body size (16 MiB). Larger telemetry batches should be
/// split by the client.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TraceStore>,
    pub info: ServerInfo,
}

/// Static server configuration echoed by `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub grpc_listen: String,
    pub http_listen: String,
    pub data_dir: String,
    pub retention_days: i64,
}

impl ServerInfo {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            grpc_listen: config.grpc_listen.to_string(),
            http_listen: config.http_listen.to_string(),
            data_dir: config.data_dir.display().to_string(),
            retention_days: config.retention_days,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/traces", post(export_traces))
        .route("/api/stats", get(stats))
        .route("/api/services", get(list_services))
        .route("/api/services/:service", delete(delete_service))
        .route("/api/spans", get(get_spans))
        .route("/api/traceids", get(get_trace_ids))
        .route("/api/trace/:trace_id", get(get_trace))
        .route("/api/spantree/:span_id", get(get_span_tree))
        .layer(RequestDecompressionLayer::new())
        .layer(DefaultBodyLimit::max(DEFAULT_MAX_BODY_SIZE))
        .with_state(state)
}

/// API error with its HTTP status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidHex { .. } | StoreError::SpanIdLength { .. } => {
                Self::BadRequest(err.to_string())
            }
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// OTLP/HTTP trace export.
async fn export_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(PROTOBUF_CONTENT_TYPE);
    if !content_type.starts_with(PROTOBUF_CONTENT_TYPE) {
        return Err(ApiError::BadRequest(format!(
            "unsupported content type {content_type:?}"
        )));
    }

    let request = ExportTraceServiceRequest::decode(body.as_ref())
        .map_err(|e| ApiError::BadRequest(format!("invalid protobuf payload: {e}")))?;

    for batch in &request.resource_spans {
        if let Err(error) = state.store.write_resource_spans(batch) {
            warn!(%error, "failed to store span batch");
        }
    }

    let response = ExportTraceServiceResponse {
        partial_success: None,
    };
    Ok((
        [(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)],
        response.encode_to_vec(),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    config: ServerInfo,
    services: Vec<PartitionStats>,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let services = state.store.partition_stats()?;
    Ok(Json(StatsResponse {
        config: state.info.clone(),
        services,
    }))
}

async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceSummary>>, ApiError> {
    Ok(Json(state.store.list_services()?))
}

#[derive(Debug, Deserialize)]
struct ScopedQuery {
    service: String,
    #[serde(default)]
    limit: i64,
}

#[derive(Debug, Serialize)]
struct SpansResponse {
    service: String,
    spans: Vec<SpanSummary>,
}

async fn get_spans(
    State(state): State<AppState>,
    Query(query): Query<ScopedQuery>,
) -> Result<Json<SpansResponse>, ApiError> {
    let spans = state.store.get_spans(&query.service, query.limit)?;
    Ok(Json(SpansResponse {
        service: query.service,
        spans,
    }))
}

#[derive(Debug, Serialize)]
struct TraceIdsResponse {
    service: String,
    trace_ids: Vec<String>,
}

async fn get_trace_ids(
    State(state): State<AppState>,
    Query(query): Query<ScopedQuery>,
) -> Result<Json<TraceIdsResponse>, ApiError> {
    let trace_ids = state.store.get_trace_ids(&query.service, query.limit)?;
    Ok(Json(TraceIdsResponse {
        service: query.service,
        trace_ids,
    }))
}

async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<SpanTree>, ApiError> {
    let spans = state.store.get_trace_by_id(&trace_id)?;
    if spans.is_empty() {
        return Err(ApiError::NotFound(format!("trace {trace_id:?} not found")));
    }
    Ok(Json(SpanTree { trace_id, spans }))
}

async fn get_span_tree(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
) -> Result<Json<SpanTree>, ApiError> {
    let raw = hex::decode(&span_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid span id {span_id:?}: {e}")))?;
    match state.store.get_span_tree(&raw)? {
        Some(tree) => Ok(Json(tree)),
        None => Err(ApiError::NotFound(format!("span {span_id:?} not found"))),
    }
}

async fn delete_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_service(&service)?;
    Ok(StatusCode::NO_CONTENT)
}
