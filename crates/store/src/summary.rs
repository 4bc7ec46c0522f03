//! Read-model types returned by store queries.

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::trace::v1::Span;
use prost::Message;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Closed status sum for a span: unset (0), ok (1), error (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    /// Map an OTLP status code; anything out of range is treated as unset.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Ok,
            2 => Self::Error,
            _ => Self::Unset,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Unset => 0,
            Self::Ok => 1,
            Self::Error => 2,
        }
    }
}

impl Serialize for SpanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for SpanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::from_code)
    }
}

/// The key fields of one stored span, plus the raw OTLP span bytes for
/// consumers that want the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanSummary {
    /// Trace identifier, lowercase hex (32 chars).
    pub trace_id: String,
    /// Span identifier, lowercase hex (16 chars).
    pub span_id: String,
    /// Parent span identifier, lowercase hex; empty for root spans.
    pub parent_span_id: String,
    /// Operation name, verbatim.
    pub name: String,
    /// `YYYY-MM` partition the record lives in.
    pub month: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SpanStatus,
    /// Serialized `opentelemetry.proto.trace.v1.Span`.
    #[serde(with = "proto_bytes")]
    pub span_proto: Vec<u8>,
}

impl SpanSummary {
    pub(crate) fn from_span(span: &Span, month: &str) -> Self {
        Self {
            trace_id: hex::encode(&span.trace_id),
            span_id: hex::encode(&span.span_id),
            parent_span_id: hex::encode(&span.parent_span_id),
            name: span.name.clone(),
            month: month.to_owned(),
            start_time: DateTime::from_timestamp_nanos(span.start_time_unix_nano as i64),
            end_time: DateTime::from_timestamp_nanos(span.end_time_unix_nano as i64),
            status: SpanStatus::from_code(span.status.as_ref().map_or(0, |s| s.code)),
            span_proto: span.encode_to_vec(),
        }
    }

    /// True when this span has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }
}

/// Aggregate statistics for one service partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    /// Distinct trace identifiers across all decodable records.
    pub trace_count: u64,
    /// Total records, including any that no longer decode.
    pub span_count: u64,
    /// Start time of the newest record, taken from its key prefix.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Record count for one month partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthStats {
    pub month: String,
    pub span_count: u64,
}

/// Month-by-month breakdown of one service partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub service: String,
    pub months: Vec<MonthStats>,
}

/// All spans of one trace found within the reconstruction window around an
/// anchor span. Order is unspecified; callers needing a tree sort it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanTree {
    pub trace_id: String,
    pub spans: Vec<SpanSummary>,
}

mod proto_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::trace::v1::{status, Status};

    use super::*;

    fn sample_span() -> Span {
        Span {
            trace_id: vec![0x0D; 16],
            span_id: vec![0x0E; 8],
            parent_span_id: vec![],
            name: "GET /api/users".into(),
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_000_250_000_000,
            status: Some(Status {
                code: status::StatusCode::Error as i32,
                message: "boom".into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn summary_hex_encodes_identifiers() {
        let summary = SpanSummary::from_span(&sample_span(), "2023-11");
        assert_eq!(summary.trace_id, "0d".repeat(16));
        assert_eq!(summary.span_id, "0e".repeat(8));
        assert_eq!(summary.parent_span_id, "");
        assert!(summary.is_root());
        assert_eq!(summary.month, "2023-11");
        assert_eq!(summary.status, SpanStatus::Error);
        assert_eq!(summary.span_proto, sample_span().encode_to_vec());
    }

    #[test]
    fn status_codes_map_to_the_closed_sum() {
        assert_eq!(SpanStatus::from_code(0), SpanStatus::Unset);
        assert_eq!(SpanStatus::from_code(1), SpanStatus::Ok);
        assert_eq!(SpanStatus::from_code(2), SpanStatus::Error);
        assert_eq!(SpanStatus::from_code(99), SpanStatus::Unset);
        assert_eq!(SpanStatus::Error.code(), 2);
    }

    #[test]
    fn summary_serde_round_trips() {
        let summary = SpanSummary::from_span(&sample_span(), "2023-11");
        let json = serde_json::to_string(&summary).unwrap();
        let back: SpanSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);

        // span_proto travels as base64, not a byte array
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["span_proto"].is_string());
        assert_eq!(value["status"], 2);
    }
}
