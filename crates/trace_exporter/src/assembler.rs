//! Batch Assembler - Size- and Count-Bounded Batching
//!
//! This module provides a **pure batching abstraction** with no concurrency overhead.
//! It accumulates encoded records and decides when the current batch must be sealed.
//!
//! # Design
//!
//! Concurrency is an *orthogonal concern* to batching. The assembler holds no
//! `Arc`, no atomics and no transport; the flush scheduler wraps it in a mutex
//! and serializes `append` against `drain`.
//!
//! Every batch the assembler hands out obeys two ceilings:
//!
//! - `encoded_size() <= max_batch_bytes`, where the size counts the codec's
//!   worst-case envelope plus every record and its separator
//! - `len() <= max_spans_per_batch`
//!
//! When a record would push the current batch over either ceiling, the current
//! records are sealed into a [`Batch`] first and the record starts a fresh one:
//!
//! ```rust,ignore
//! match assembler.append(record) {
//!     AppendOutcome::Accepted => {}
//!     AppendOutcome::FlushRequired(sealed) => transport.send(sealed).await?,
//!     AppendOutcome::RejectedTooLarge { size, limit } => { /* drop and report */ }
//! }
//!
//! // Periodic or explicit flush
//! let batch = assembler.drain();
//! ```
//!
//! A record that cannot fit even an otherwise empty batch is rejected, never
//! truncated.

use crate::codec::{EncodedRecord, SpanCodec};
use std::time::Duration;
use tokio::time::Instant;

/// Byte and count ceilings for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerLimits {
    /// Maximum serialized size of a batch, envelope included
    pub max_batch_bytes: usize,
    /// Maximum number of spans per batch
    pub max_spans_per_batch: usize,
    /// Worst-case envelope bytes of one batch
    pub envelope_overhead: usize,
    /// Bytes each record adds on top of its own length
    pub record_overhead: usize,
}

impl AssemblerLimits {
    /// Limits with the envelope and separator costs of `codec`.
    pub fn for_codec(
        codec: &dyn SpanCodec,
        max_batch_bytes: usize,
        max_spans_per_batch: usize,
    ) -> Self {
        Self {
            max_batch_bytes,
            max_spans_per_batch,
            envelope_overhead: codec.envelope_overhead(),
            record_overhead: codec.record_overhead(),
        }
    }
}

/// Mutable bookkeeping of the pending batch
#[derive(Debug, Clone, Copy)]
pub struct BufferState {
    /// Records currently buffered
    pub pending_count: usize,
    /// Accumulated record bytes (separators included, envelope excluded)
    pub pending_bytes: usize,
    /// When the buffer was last sealed or drained
    pub last_flush: Instant,
    /// Sequence number the next batch will carry
    pub sequence: u64,
}

impl BufferState {
    fn new() -> Self {
        Self {
            pending_count: 0,
            pending_bytes: 0,
            last_flush: Instant::now(),
            sequence: 0,
        }
    }
}

/// An ordered group of records destined for one transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    sequence: u64,
    records: Vec<EncodedRecord>,
    encoded_size: usize,
}

impl Batch {
    /// Sequence number assigned when the batch was sealed
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    /// Worst-case serialized size (envelope + records)
    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Number of spans in the batch
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

/// Result of offering one record to the assembler
#[derive(Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record joined the current batch
    Accepted,
    /// The record started a fresh batch; the sealed previous batch must be sent
    FlushRequired(Batch),
    /// The record alone exceeds the batch budget and was not buffered
    RejectedTooLarge { size: usize, limit: usize },
}

/// Accumulates encoded records until a flush trigger fires.
pub struct BatchAssembler {
    records: Vec<EncodedRecord>,
    limits: AssemblerLimits,
    state: BufferState,
}

impl BatchAssembler {
    /// Creates a new, empty assembler
    pub fn new(limits: AssemblerLimits) -> Self {
        Self {
            records: Vec::new(),
            limits,
            state: BufferState::new(),
        }
    }

    /// Offers a record to the current batch.
    pub fn append(&mut self, record: EncodedRecord) -> AppendOutcome {
        let cost = record.len() + self.limits.record_overhead;
        let alone = self.limits.envelope_overhead + cost;
        if alone > self.limits.max_batch_bytes {
            return AppendOutcome::RejectedTooLarge {
                size: alone,
                limit: self.limits.max_batch_bytes,
            };
        }

        let count_full = self.state.pending_count >= self.limits.max_spans_per_batch;
        let bytes_full = self.projected_size() + cost > self.limits.max_batch_bytes;
        let sealed = if !self.records.is_empty() && (count_full || bytes_full) {
            Some(self.drain())
        } else {
            None
        };

        self.records.push(record);
        self.state.pending_count += 1;
        self.state.pending_bytes += cost;

        debug_assert!(self.projected_size() <= self.limits.max_batch_bytes);
        debug_assert!(self.state.pending_count <= self.limits.max_spans_per_batch);

        match sealed {
            Some(batch) => AppendOutcome::FlushRequired(batch),
            None => AppendOutcome::Accepted,
        }
    }

    /// Removes and returns every buffered record as one batch, resetting the state.
    ///
    /// Always returns a batch; it is empty when nothing was buffered.
    pub fn drain(&mut self) -> Batch {
        let batch = Batch {
            sequence: self.claim_sequence(),
            encoded_size: self.projected_size(),
            records: std::mem::take(&mut self.records),
        };
        self.state.pending_count = 0;
        self.state.pending_bytes = 0;
        self.state.last_flush = Instant::now();
        batch
    }

    /// Hands out the next sequence number.
    pub fn claim_sequence(&mut self) -> u64 {
        let sequence = self.state.sequence;
        self.state.sequence += 1;
        sequence
    }

    /// Serialized size the current batch would have if sealed now
    pub fn projected_size(&self) -> usize {
        self.limits.envelope_overhead + self.state.pending_bytes
    }

    /// Returns true if records are pending and `interval` has passed since the last flush.
    pub fn should_flush(&self, interval: Duration) -> bool {
        !self.records.is_empty() && self.state.last_flush.elapsed() >= interval
    }

    /// Returns the number of pending records
    pub fn pending_count(&self) -> usize {
        self.state.pending_count
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn state(&self) -> &BufferState {
        &self.state
    }

    pub fn limits(&self) -> &AssemblerLimits {
        &self.limits
    }
}
