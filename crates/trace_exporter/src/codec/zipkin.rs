//! Zipkin v2 JSON encoding.

use super::{duration_micros, epoch_micros, EncodedRecord, SpanCodec};
use crate::assembler::Batch;
use crate::error::EncodingError;
use crate::span::{AttributeValue, Span, SpanKind, Tag};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ZipkinSpan<'a> {
    trace_id: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    timestamp: i64,
    duration: i64,
    local_endpoint: LocalEndpoint<'a>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<&'a str, String>,
    debug: bool,
    shared: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalEndpoint<'a> {
    service_name: &'a str,
}

/// Encodes spans as Zipkin v2 JSON objects and frames them as a JSON array.
pub struct ZipkinCodec {
    service_name: String,
    // Envelope tags, stringified once; span attributes override them.
    tags: Vec<(String, String)>,
}

impl ZipkinCodec {
    pub fn new(service_name: &str, tags: Vec<Tag>) -> Self {
        Self {
            service_name: service_name.to_string(),
            tags: tags
                .into_iter()
                .map(|t| (t.key, t.value.to_tag_string()))
                .collect(),
        }
    }
}

fn zipkin_kind(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Internal => None,
        SpanKind::Server => Some("SERVER"),
        SpanKind::Client => Some("CLIENT"),
        SpanKind::Producer => Some("PRODUCER"),
        SpanKind::Consumer => Some("CONSUMER"),
    }
}

impl SpanCodec for ZipkinCodec {
    fn encode(&self, span: &Span) -> Result<EncodedRecord, EncodingError> {
        let mut tags: BTreeMap<&str, String> = self
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        for (key, value) in &span.attributes {
            if let AttributeValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(EncodingError::Unrepresentable {
                        field: "attributes",
                    });
                }
            }
            tags.insert(key.as_str(), value.to_tag_string());
        }

        let translated = ZipkinSpan {
            trace_id: format!("{:032x}", span.trace_id),
            id: format!("{:016x}", span.span_id),
            parent_id: span.parent_span_id.map(|p| format!("{:016x}", p)),
            name: &span.name,
            kind: zipkin_kind(span.kind),
            timestamp: epoch_micros(span.start_time)?,
            duration: duration_micros(span.duration)?,
            local_endpoint: LocalEndpoint {
                service_name: &self.service_name,
            },
            tags,
            debug: false,
            shared: false,
        };

        // Serializing plain strings and integers cannot fail.
        let json = serde_json::to_vec(&translated).map_err(|_| EncodingError::Unrepresentable {
            field: "span",
        })?;
        Ok(EncodedRecord::new(json))
    }

    fn frame(&self, batch: &Batch) -> Bytes {
        let mut body = BytesMut::with_capacity(batch.encoded_size());
        body.put_u8(b'[');
        for (i, record) in batch.records().iter().enumerate() {
            if i > 0 {
                body.put_u8(b',');
            }
            body.put_slice(record.as_bytes());
        }
        body.put_u8(b']');
        body.freeze()
    }

    fn envelope_overhead(&self) -> usize {
        2
    }

    fn record_overhead(&self) -> usize {
        1
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn name(&self) -> &str {
        "zipkin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{AssemblerLimits, AppendOutcome, BatchAssembler};
    use serde_json::Value;
    use std::time::{Duration, SystemTime};

    fn test_span() -> Span {
        Span::new(0xabc, 0x1f, "GET /users").with_timing(
            SystemTime::UNIX_EPOCH + Duration::from_millis(1_234),
            Duration::from_micros(250),
        )
    }

    #[test]
    fn test_translate_root_span() {
        let codec = ZipkinCodec::new("users-svc", vec![]);
        let record = codec.encode(&test_span()).unwrap();
        let json: Value = serde_json::from_slice(record.as_bytes()).unwrap();

        assert_eq!(json["traceId"], "00000000000000000000000000000abc");
        assert_eq!(json["id"], "000000000000001f");
        assert_eq!(json["name"], "GET /users");
        assert_eq!(json["timestamp"], 1_234_000);
        assert_eq!(json["duration"], 250);
        assert_eq!(json["localEndpoint"]["serviceName"], "users-svc");
        assert!(json.get("parentId").is_none());
        assert!(json.get("kind").is_none());
        assert!(json.get("tags").is_none());
    }

    #[test]
    fn test_translate_child_with_tags() {
        let codec = ZipkinCodec::new("svc", vec![Tag::new("hostname", "box-1"), Tag::new("env", "dev")]);
        let mut span = test_span().with_parent(0x10).with_kind(SpanKind::Server);
        span.set_attribute("http.status_code", 200i64);
        span.set_attribute("env", "prod");
        let json: Value = serde_json::from_slice(codec.encode(&span).unwrap().as_bytes()).unwrap();

        assert_eq!(json["parentId"], "0000000000000010");
        assert_eq!(json["kind"], "SERVER");
        assert_eq!(json["tags"]["http.status_code"], "200");
        assert_eq!(json["tags"]["hostname"], "box-1");
        assert_eq!(json["tags"]["env"], "prod");
    }

    #[test]
    fn test_non_finite_attribute_rejected() {
        let codec = ZipkinCodec::new("svc", vec![]);
        let mut span = test_span();
        span.set_attribute("ratio", f64::NAN);
        assert_eq!(
            codec.encode(&span),
            Err(EncodingError::Unrepresentable {
                field: "attributes"
            })
        );
    }

    #[test]
    fn test_frame_is_json_array_within_estimate() {
        let codec = ZipkinCodec::new("svc", vec![]);
        let limits = AssemblerLimits::for_codec(&codec, 10_000, 10);
        let mut assembler = BatchAssembler::new(limits);
        for _ in 0..3 {
            let outcome = assembler.append(codec.encode(&test_span()).unwrap());
            assert!(matches!(outcome, AppendOutcome::Accepted));
        }
        let batch = assembler.drain();
        let body = codec.frame(&batch);

        let parsed: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.len(), 3);
        // The estimate counts one separator per record, one more than the frame needs.
        assert_eq!(body.len() + 1, batch.encoded_size());
    }

    #[test]
    fn test_empty_frame() {
        let codec = ZipkinCodec::new("svc", vec![]);
        let mut assembler = BatchAssembler::new(AssemblerLimits::for_codec(&codec, 100, 1));
        assert_eq!(codec.frame(&assembler.drain()).as_ref(), b"[]");
    }
}
