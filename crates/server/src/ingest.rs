//! tonic gRPC OTLP receiver.
//!
//! Implements the TraceService from the OpenTelemetry collector protocol.
//! Each `ResourceSpans` in a request is written through the store on its
//! own; a failed write is logged and does not fail the export, matching
//! collector semantics where ingestion is best-effort per batch.

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceService;
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};
use tracedb_store::TraceStore;
use tracing::warn;

/// gRPC receiver for OTLP trace exports.
#[derive(Clone)]
pub struct OtlpTraceReceiver {
    store: Arc<TraceStore>,
}

impl OtlpTraceReceiver {
    /// Create a receiver writing into the given store.
    pub fn new(store: Arc<TraceStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpTraceReceiver {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let request = request.into_inner();

        for batch in &request.resource_spans {
            if let Err(error) = self.store.write_resource_spans(batch) {
                warn!(%error, "failed to store span batch");
            }
        }

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

/// Re-export of the generated service server for registration in `main`.
pub use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    use super::*;

    fn test_receiver() -> (tempfile::TempDir, Arc<TraceStore>, OtlpTraceReceiver) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            Arc::new(TraceStore::open(dir.path().join("traces.db"), 60).expect("open store"));
        let receiver = OtlpTraceReceiver::new(Arc::clone(&store));
        (dir, store, receiver)
    }

    fn service_name_kv(name: &str) -> KeyValue {
        KeyValue {
            key: "service.name".to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(name.to_string())),
            }),
        }
    }

    fn export_request(service: &str, spans: Vec<Span>) -> ExportTraceServiceRequest {
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
    }

    #[tokio::test]
    async fn export_persists_spans() {
        let (_dir, store, receiver) = test_receiver();

        let request = Request::new(export_request(
            "grpc-test-service",
            vec![Span {
                trace_id: vec![0xAA; 16],
                span_id: vec![0xBB; 8],
                name: "grpc-test-span".to_string(),
                start_time_unix_nano: 1_700_000_000_000_000_000,
                end_time_unix_nano: 1_700_000_000_500_000_000,
                ..Default::default()
            }],
        ));

        let response = receiver.export(request).await;
        assert!(response.is_ok());

        let spans = store.get_spans("grpc-test-service", 10).expect("get_spans");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "grpc-test-span");
    }

    #[tokio::test]
    async fn empty_export_succeeds() {
        let (_dir, store, receiver) = test_receiver();

        let request = Request::new(ExportTraceServiceRequest {
            resource_spans: vec![],
        });
        assert!(receiver.export(request).await.is_ok());
        assert!(store.list_services().expect("services").is_empty());
    }

    #[tokio::test]
    async fn multiple_batches_land_in_their_services() {
        let (_dir, store, receiver) = test_receiver();

        let span = |id: u8| Span {
            trace_id: vec![id; 16],
            span_id: vec![id; 8],
            name: format!("span-{id}"),
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_001_000_000_000,
            ..Default::default()
        };

        let request = Request::new(ExportTraceServiceRequest {
            resource_spans: vec![
                export_request("svc-a", vec![span(1), span(2)]).resource_spans.remove(0),
                export_request("svc-b", vec![span(3)]).resource_spans.remove(0),
            ],
        });
        assert!(receiver.export(request).await.is_ok());

        assert_eq!(store.get_spans("svc-a", 10).expect("spans").len(), 2);
        assert_eq!(store.get_spans("svc-b", 10).expect("spans").len(), 1);
    }
}
