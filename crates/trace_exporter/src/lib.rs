//! Batching Trace Exporter
//!
//! Buffers finished spans and ships them to a tracing backend in size- and
//! time-bounded batches. Two wire formats are provided: Jaeger thrift in a single
//! UDP datagram per batch, and Zipkin v2 JSON in a single HTTP POST per batch.
//!
//! # Pipeline
//!
//! ```text
//! on_span_finished ─► SpanCodec::encode ─► BatchAssembler ─┐
//!                                                          │ sealed / drained batches (FIFO)
//!                         timer tick, flush(), close() ────┤
//!                                                          ▼
//!                                         flush worker ─► SpanTransport::send
//! ```
//!
//! Producers only hold the assembler lock for the append. One background task
//! per exporter performs every network send, so batches leave in the order they
//! were sealed and at most one send is in flight.
//!
//! Native async traits are used throughout (no `#[async_trait]` macro).

pub mod assembler;
pub mod codec;
pub mod config;
pub mod environment;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod scheduler;
pub mod span;
pub mod transport;

// Re-export main types
pub use assembler::{AppendOutcome, AssemblerLimits, Batch, BatchAssembler, BufferState};
pub use codec::{EncodedRecord, JaegerCodec, SpanCodec, ZipkinCodec};
pub use config::{Endpoint, ExporterConfig};
pub use environment::EnvironmentSnapshot;
pub use error::{ConfigError, EncodingError, ExportError, FlushResult, SetupError, TransportError};
pub use exporter::{BatchingExporter, Exporter, ExporterBoxed};
pub use metrics::{ExportMetrics, FlushObserver, FlushTrigger, LoggingObserver};
pub use scheduler::{FlushScheduler, SchedulerState};
pub use span::{AttributeValue, ReferenceKind, Span, SpanKind, SpanReference, Tag};
pub use transport::{HttpTransport, SpanTransport, SpanTransportBoxed, UdpTransport};
