//! Span encoders.
//!
//! A [`SpanCodec`] turns one [`Span`] into an [`EncodedRecord`] and later frames a
//! whole [`Batch`] of records into the single payload a transport sends. Encoding
//! is pure and may run concurrently on independent spans.

pub mod jaeger;
pub mod thrift;
pub mod zipkin;

use crate::assembler::Batch;
use crate::error::EncodingError;
use crate::span::Span;
use bytes::Bytes;
use std::time::{Duration, SystemTime};

pub use jaeger::JaegerCodec;
pub use zipkin::ZipkinCodec;

/// One span serialized in the target wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    bytes: Bytes,
}

impl EncodedRecord {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Encoded byte length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Wire format of one exporter: per-span encoding plus batch framing.
pub trait SpanCodec: Send + Sync {
    /// Encodes a single span.
    fn encode(&self, span: &Span) -> Result<EncodedRecord, EncodingError>;

    /// Frames a batch (envelope + records) into one physical payload.
    fn frame(&self, batch: &Batch) -> Bytes;

    /// Worst-case bytes the envelope adds to a batch, independent of its records.
    fn envelope_overhead(&self) -> usize;

    /// Bytes each record adds on top of its own length (separators).
    fn record_overhead(&self) -> usize {
        0
    }

    /// MIME type of the framed payload
    fn content_type(&self) -> &'static str;

    /// Returns the codec name for debugging.
    fn name(&self) -> &str;
}

/// Microseconds since the Unix epoch as a signed 64-bit value.
pub(crate) fn epoch_micros(time: SystemTime) -> Result<i64, EncodingError> {
    let since_epoch = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_| EncodingError::Unrepresentable {
            field: "start_time",
        })?;
    i64::try_from(since_epoch.as_micros()).map_err(|_| EncodingError::Unrepresentable {
        field: "start_time",
    })
}

/// Duration in microseconds as a signed 64-bit value.
pub(crate) fn duration_micros(duration: Duration) -> Result<i64, EncodingError> {
    i64::try_from(duration.as_micros()).map_err(|_| EncodingError::Unrepresentable {
        field: "duration",
    })
}
