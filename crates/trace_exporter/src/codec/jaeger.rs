//! Jaeger agent encoding: thrift compact `emitBatch` datagrams.

use super::thrift::{field_type, CompactWriter, MAX_VARINT32_LEN, MESSAGE_ONEWAY};
use super::{duration_micros, epoch_micros, EncodedRecord, SpanCodec};
use crate::assembler::Batch;
use crate::error::EncodingError;
use crate::span::{AttributeValue, ReferenceKind, Span, SpanReference, Tag};
use bytes::Bytes;

const EMIT_BATCH: &str = "emitBatch";
const SAMPLED_FLAG: i32 = 1;

/// `jaeger.TagType`
mod tag_type {
    pub const STRING: i32 = 0;
    pub const DOUBLE: i32 = 1;
    pub const BOOL: i32 = 2;
    pub const LONG: i32 = 3;
}

/// `jaeger.SpanRefType`
mod ref_type {
    pub const CHILD_OF: i32 = 0;
    pub const FOLLOWS_FROM: i32 = 1;
}

/// Encodes spans as `jaeger.Span` structs and frames them behind a `jaeger.Process`.
pub struct JaegerCodec {
    service_name: String,
    // `jaeger.Process` struct body, encoded once
    process: Bytes,
    envelope_overhead: usize,
}

impl JaegerCodec {
    pub fn new(service_name: &str, process_tags: Vec<Tag>) -> Self {
        let mut w = CompactWriter::with_capacity(256);
        w.struct_begin();
        w.field_string(1, service_name);
        if !process_tags.is_empty() {
            w.field_list_begin(2, field_type::STRUCT, process_tags.len());
            for tag in &process_tags {
                write_tag(&mut w, &tag.key, &tag.value);
            }
        }
        w.struct_end();

        let mut codec = Self {
            service_name: service_name.to_string(),
            process: w.freeze(),
            envelope_overhead: 0,
        };
        // An empty frame with the widest seq id, plus room for the widest list size.
        let empty = codec.frame_records(i32::MAX, &[]);
        codec.envelope_overhead = empty.len() + MAX_VARINT32_LEN;
        codec
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn frame_records(&self, seq_id: i32, records: &[EncodedRecord]) -> Bytes {
        let body: usize = records.iter().map(EncodedRecord::len).sum();
        let mut w = CompactWriter::with_capacity(self.process.len() + body + 32);
        w.message_begin(EMIT_BATCH, MESSAGE_ONEWAY, seq_id);
        w.struct_begin();
        // emitBatch args, field 1: Batch
        w.field_struct_begin(1);
        w.field_header(field_type::STRUCT, 1);
        w.raw(&self.process);
        w.field_header(field_type::LIST, 2);
        w.list_header(field_type::STRUCT, records.len());
        for record in records {
            w.raw(record.as_bytes());
        }
        w.struct_end();
        w.struct_end();
        w.freeze()
    }
}

impl SpanCodec for JaegerCodec {
    fn encode(&self, span: &Span) -> Result<EncodedRecord, EncodingError> {
        let start = epoch_micros(span.start_time)?;
        let duration = duration_micros(span.duration)?;

        let mut references: Vec<SpanReference> = span.references.clone();
        if let Some(parent) = span.parent_span_id {
            let linked = references
                .iter()
                .any(|r| r.kind == ReferenceKind::ChildOf && r.span_id == parent);
            if !linked {
                references.insert(
                    0,
                    SpanReference {
                        kind: ReferenceKind::ChildOf,
                        trace_id: span.trace_id,
                        span_id: parent,
                    },
                );
            }
        }

        let mut w = CompactWriter::with_capacity(128 + span.name.len());
        w.struct_begin();
        w.field_i64(1, span.trace_id_low() as i64);
        w.field_i64(2, span.trace_id_high() as i64);
        w.field_i64(3, span.span_id as i64);
        w.field_i64(4, span.parent_span_id.unwrap_or(0) as i64);
        w.field_string(5, &span.name);
        if !references.is_empty() {
            w.field_list_begin(6, field_type::STRUCT, references.len());
            for reference in &references {
                write_reference(&mut w, reference);
            }
        }
        w.field_i32(7, SAMPLED_FLAG);
        w.field_i64(8, start);
        w.field_i64(9, duration);
        if !span.attributes.is_empty() {
            w.field_list_begin(10, field_type::STRUCT, span.attributes.len());
            for (key, value) in &span.attributes {
                write_tag(&mut w, key, value);
            }
        }
        w.struct_end();

        Ok(EncodedRecord::new(w.freeze()))
    }

    fn frame(&self, batch: &Batch) -> Bytes {
        self.frame_records(batch.sequence() as i32, batch.records())
    }

    fn envelope_overhead(&self) -> usize {
        self.envelope_overhead
    }

    fn content_type(&self) -> &'static str {
        "application/vnd.apache.thrift.compact"
    }

    fn name(&self) -> &str {
        "jaeger"
    }
}

fn write_tag(w: &mut CompactWriter, key: &str, value: &AttributeValue) {
    w.struct_begin();
    w.field_string(1, key);
    match value {
        AttributeValue::String(s) => {
            w.field_i32(2, tag_type::STRING);
            w.field_string(3, s);
        }
        AttributeValue::Float(f) => {
            w.field_i32(2, tag_type::DOUBLE);
            w.field_double(4, *f);
        }
        AttributeValue::Bool(b) => {
            w.field_i32(2, tag_type::BOOL);
            w.field_bool(5, *b);
        }
        AttributeValue::Int(i) => {
            w.field_i32(2, tag_type::LONG);
            w.field_i64(6, *i);
        }
    }
    w.struct_end();
}

fn write_reference(w: &mut CompactWriter, reference: &SpanReference) {
    let kind = match reference.kind {
        ReferenceKind::ChildOf => ref_type::CHILD_OF,
        ReferenceKind::FollowsFrom => ref_type::FOLLOWS_FROM,
    };
    w.struct_begin();
    w.field_i32(1, kind);
    w.field_i64(2, reference.trace_id as u64 as i64);
    w.field_i64(3, (reference.trace_id >> 64) as u64 as i64);
    w.field_i64(4, reference.span_id as i64);
    w.struct_end();
}
