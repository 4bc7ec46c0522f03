//! Synthetic OTLP traffic generator and query tool.
//!
//! The default mode sends randomized span trees for one service to a tracedb
//! gRPC endpoint. The query flags read back through the JSON API:
//! `--dump` prints the newest stored spans, `--traces` the newest unique
//! trace ids, `--services` the per-service summary table, and
//! `--trace <hex-id>` renders one trace as an indented tree.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tracedb_store::{ServiceSummary, SpanSummary, SpanTree};

const SPAN_NAMES: &[&str] = &[
    "GET /api/users",
    "POST /api/orders",
    "GET /api/products",
    "PUT /api/users/{id}",
    "DELETE /api/sessions",
    "GET /health",
    "POST /api/payments",
    "GET /api/inventory",
];

const SPAN_KINDS: &[span::SpanKind] = &[
    span::SpanKind::Server,
    span::SpanKind::Client,
    span::SpanKind::Internal,
];

#[derive(Debug, Parser)]
#[command(name = "trace-gen", version, about = "Synthetic OTLP trace traffic for tracedb")]
struct Args {
    /// OTLP gRPC endpoint spans are sent to.
    #[arg(long, default_value = "http://localhost:4317")]
    grpc: String,
    /// Base URL of the tracedb JSON API, used by the query modes.
    #[arg(long, default_value = "http://localhost:4318")]
    api: String,
    /// Service name to send or query.
    #[arg(long, default_value = "frontend")]
    service: String,
    /// Number of spans to send in send mode.
    #[arg(long, default_value_t = 100)]
    count: usize,
    /// Print the newest 50 stored spans for --service instead of sending.
    #[arg(long)]
    dump: bool,
    /// Print the newest 100 unique trace ids for --service instead of sending.
    #[arg(long)]
    traces: bool,
    /// Print every service with trace count, span count, and last-updated.
    #[arg(long)]
    services: bool,
    /// Fetch all spans of the given hex trace id and print them as a tree.
    #[arg(long)]
    trace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.dump {
        return dump_spans(&args).await;
    }
    if args.traces {
        return dump_trace_ids(&args).await;
    }
    if args.services {
        return dump_services(&args).await;
    }
    if let Some(ref trace_id) = args.trace {
        return dump_trace_tree(&args, trace_id).await;
    }
    send_spans(&args).await
}

/// Send `count` spans grouped into small randomized trees, one export per trace.
async fn send_spans(args: &Args) -> Result<()> {
    let mut client = TraceServiceClient::connect(args.grpc.clone())
        .await
        .with_context(|| format!("connect to {}", args.grpc))?;

    let mut sent = 0usize;
    let mut traces = 0usize;
    while sent < args.count {
        let size = rand::thread_rng().gen_range(1..=4).min(args.count - sent);
        let batch = random_trace(&args.service, size);
        client
            .export(ExportTraceServiceRequest {
                resource_spans: vec![batch],
            })
            .await
            .context("export")?;
        sent += size;
        traces += 1;
    }

    println!("sent {sent} spans in {traces} traces for service {:?}", args.service);
    Ok(())
}

/// Build one trace: a root span plus `size - 1` children of the root.
fn random_trace(service: &str, size: usize) -> ResourceSpans {
    let mut rng = rand::thread_rng();
    let trace_id: [u8; 16] = rng.gen();
    let root_id: [u8; 8] = rng.gen();
    let start = Utc::now() - Duration::minutes(rng.gen_range(0..30));

    let mut spans = vec![build_span(&mut rng, trace_id, root_id, None, start)];
    for i in 1..size {
        let child_id: [u8; 8] = rng.gen();
        let child_start = start + Duration::milliseconds(5 * i as i64);
        spans.push(build_span(&mut rng, trace_id, child_id, Some(root_id), child_start));
    }

    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![KeyValue {
                key: "service.name".to_string(),
                value: Some(AnyValue {
                    value: Some(any_value::Value::StringValue(service.to_string())),
                }),
            }],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn build_span(
    rng: &mut impl Rng,
    trace_id: [u8; 16],
    span_id: [u8; 8],
    parent: Option<[u8; 8]>,
    start: DateTime<Utc>,
) -> Span {
    let start_nanos = start.timestamp_nanos_opt().unwrap_or_default() as u64;
    let duration_nanos = rng.gen_range(100_000..250_000_000);
    let code = if rng.gen_ratio(1, 10) {
        status::StatusCode::Error
    } else {
        status::StatusCode::Ok
    };

    Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id: parent.map(|p| p.to_vec()).unwrap_or_default(),
        name: SPAN_NAMES.choose(rng).copied().unwrap_or("op").to_string(),
        kind: SPAN_KINDS.choose(rng).copied().unwrap_or(span::SpanKind::Internal) as i32,
        start_time_unix_nano: start_nanos,
        end_time_unix_nano: start_nanos + duration_nanos,
        status: Some(Status {
            code: code as i32,
            message: String::new(),
        }),
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
struct SpansResponse {
    service: String,
    spans: Vec<SpanSummary>,
}

async fn dump_spans(args: &Args) -> Result<()> {
    let url = format!("{}/api/spans?service={}&limit=50", args.api, args.service);
    let response: SpansResponse = fetch_json(&url).await?;

    println!("newest spans for service {:?}:", response.service);
    for span in &response.spans {
        println!(
            "{}  {}  status={}  {:<24}  trace={}",
            span.start_time.format("%Y-%m-%d %H:%M:%S%.3f"),
            span.span_id,
            span.status.code(),
            span.name,
            span.trace_id,
        );
    }
    println!("{} spans", response.spans.len());
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TraceIdsResponse {
    service: String,
    trace_ids: Vec<String>,
}

async fn dump_trace_ids(args: &Args) -> Result<()> {
    let url = format!("{}/api/traceids?service={}&limit=100", args.api, args.service);
    let response: TraceIdsResponse = fetch_json(&url).await?;

    println!("newest trace ids for service {:?}:", response.service);
    for id in &response.trace_ids {
        println!("{id}");
    }
    println!("{} traces", response.trace_ids.len());
    Ok(())
}

async fn dump_services(args: &Args) -> Result<()> {
    let url = format!("{}/api/services", args.api);
    let services: Vec<ServiceSummary> = fetch_json(&url).await?;

    println!("{:<32} {:>8} {:>8}  last updated", "service", "traces", "spans");
    for svc in &services {
        let updated = svc
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<32} {:>8} {:>8}  {updated}", svc.name, svc.trace_count, svc.span_count);
    }
    Ok(())
}

async fn dump_trace_tree(args: &Args, trace_id: &str) -> Result<()> {
    let url = format!("{}/api/trace/{}", args.api, trace_id);
    let tree: SpanTree = fetch_json(&url).await?;

    let mut spans = tree.spans;
    spans.sort_by_key(|s| s.start_time);

    println!("trace {}:", tree.trace_id);
    let roots: Vec<usize> = (0..spans.len())
        .filter(|&i| {
            spans[i].is_root() || !spans.iter().any(|s| s.span_id == spans[i].parent_span_id)
        })
        .collect();
    for root in roots {
        print_subtree(&spans, root, 0);
    }
    Ok(())
}

fn print_subtree(spans: &[SpanSummary], index: usize, depth: usize) {
    let span = &spans[index];
    println!(
        "{}{} {} ({} -> {})",
        "  ".repeat(depth),
        span.span_id,
        span.name,
        span.start_time.format("%H:%M:%S%.3f"),
        span.end_time.format("%H:%M:%S%.3f"),
    );
    for (i, child) in spans.iter().enumerate() {
        if i != index && child.parent_span_id == span.span_id {
            print_subtree(spans, i, depth + 1);
        }
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(url: &str) -> Result<T> {
    let response = reqwest::get(url).await.with_context(|| format!("GET {url}"))?;
    if !response.status().is_success() {
        bail!("GET {url}: {}", response.status());
    }
    response.json().await.with_context(|| format!("decode {url}"))
}
