//! Record value codec.
//!
//! Each stored value is a `ResourceSpans` wrapping exactly one span together
//! with its original resource and instrumentation scope, protobuf-encoded and
//! zlib-compressed per record. Decoding is fallible by contract: scans treat
//! an undecodable value as a record to skip.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use prost::Message;
use snafu::{OptionExt, ResultExt, Snafu};

/// Codec error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    #[snafu(display("compression failed: {source}"))]
    Compress { source: std::io::Error },

    #[snafu(display("decompression failed: {source}"))]
    Decompress { source: std::io::Error },

    #[snafu(display("record is not a valid span entry: {source}"))]
    Decode { source: prost::DecodeError },

    #[snafu(display("record contains no span"))]
    EmptyEntry,
}

/// Wrap one span in a standalone `ResourceSpans`, preserving the original
/// resource and scope so the record round-trips to any OTLP consumer.
pub fn single_span_entry(batch: &ResourceSpans, scope: &ScopeSpans, span: &Span) -> ResourceSpans {
    ResourceSpans {
        resource: batch.resource.clone(),
        schema_url: batch.schema_url.clone(),
        scope_spans: vec![ScopeSpans {
            scope: scope.scope.clone(),
            schema_url: scope.schema_url.clone(),
            spans: vec![span.clone()],
        }],
    }
}

/// Serialize and compress a single-span entry into its stored form.
pub fn encode_entry(entry: &ResourceSpans) -> Result<Vec<u8>, CodecError> {
    compress(&entry.encode_to_vec())
}

/// Decompress a stored value and return the span inside it.
pub fn decode_span(value: &[u8]) -> Result<Span, CodecError> {
    let raw = decompress(value)?;
    let entry = ResourceSpans::decode(raw.as_slice()).context(DecodeSnafu)?;
    entry
        .scope_spans
        .into_iter()
        .flat_map(|scope| scope.spans)
        .next()
        .context(EmptyEntrySnafu)
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context(CompressSnafu)?;
    encoder.finish().context(CompressSnafu)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).context(DecompressSnafu)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
    use opentelemetry_proto::tonic::resource::v1::Resource;

    use super::*;

    #[test]
    fn compression_round_trips() {
        for payload in [&b""[..], b"x", b"hello hello hello hello", &[0u8; 4096]] {
            let packed = compress(payload).unwrap();
            assert_eq!(decompress(&packed).unwrap(), payload);
        }
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn entry_preserves_resource_and_scope() {
        let batch = ResourceSpans {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "service.name".into(),
                    value: Some(AnyValue {
                        value: Some(any_value::Value::StringValue("billing".into())),
                    }),
                }],
                ..Default::default()
            }),
            schema_url: "https://example.com/schema".into(),
            ..Default::default()
        };
        let scope = ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "billing-lib".into(),
                version: "1.2.3".into(),
                ..Default::default()
            }),
            schema_url: "https://example.com/scope-schema".into(),
            spans: vec![],
        };
        let span = Span {
            trace_id: vec![0x11; 16],
            span_id: vec![0x22; 8],
            name: "charge".into(),
            ..Default::default()
        };

        let entry = single_span_entry(&batch, &scope, &span);
        assert_eq!(entry.resource, batch.resource);
        assert_eq!(entry.schema_url, batch.schema_url);
        assert_eq!(entry.scope_spans.len(), 1);
        assert_eq!(entry.scope_spans[0].scope, scope.scope);
        assert_eq!(entry.scope_spans[0].spans, vec![span]);
    }

    #[test]
    fn stored_entry_decodes_back_to_the_span() {
        let span = Span {
            trace_id: vec![0xAA; 16],
            span_id: vec![0xBB; 8],
            name: "lookup".into(),
            start_time_unix_nano: 1_000,
            end_time_unix_nano: 2_000,
            ..Default::default()
        };
        let entry = single_span_entry(
            &ResourceSpans::default(),
            &ScopeSpans::default(),
            &span,
        );

        let stored = encode_entry(&entry).unwrap();
        assert_eq!(decode_span(&stored).unwrap(), span);
    }

    #[test]
    fn empty_entry_is_an_error() {
        let stored = encode_entry(&ResourceSpans::default()).unwrap();
        assert!(matches!(decode_span(&stored), Err(CodecError::EmptyEntry)));
    }
}
