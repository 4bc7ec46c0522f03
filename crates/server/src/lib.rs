//! tracedb server internals.
//!
//! The binary in `main.rs` wires these together: OTLP gRPC and HTTP ingest,
//! the JSON read API, and the background retention job, all over one shared
//! [`tracedb_store::TraceStore`].

pub mod cleanup;
pub mod config;
pub mod http;
pub mod ingest;
