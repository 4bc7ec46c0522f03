//! Embedded trace-span storage for OpenTelemetry.
//!
//! This crate provides:
//! - A single-file redb database holding one record per span
//! - Service/month partitioning with time-ordered 24-byte keys
//! - Record-level zlib compression of the original OTLP payload
//! - Newest-first readers, cross-service trace reconstruction, and
//!   whole-month retention cleanup
//!
//! Records are immutable once written; deletion happens only at month
//! granularity (retention) or service granularity (purge).

pub mod codec;
mod error;
pub mod keys;
pub mod partition;
mod store;
mod summary;

pub use error::{Result, StoreError};
pub use store::{TraceStore, DEFAULT_RETENTION_DAYS, DEFAULT_SPAN_LIMIT, DEFAULT_TRACE_ID_LIMIT};
pub use summary::{MonthStats, PartitionStats, ServiceSummary, SpanStatus, SpanSummary, SpanTree};
