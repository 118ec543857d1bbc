//! Exporter facade.
//!
//! The host tracer depends only on the [`Exporter`] trait. [`BatchingExporter`]
//! implements it by wiring a [`SpanCodec`], a transport and a [`FlushScheduler`]
//! together:
//!
//! ```rust,ignore
//! let config = ExporterConfig::new("checkout").with_endpoint(Endpoint::agent("localhost", 6832));
//! let exporter = BatchingExporter::jaeger(&config, &EnvironmentSnapshot::collect()).await?;
//!
//! exporter.on_span_finished(span).await;   // buffered, flushed by size or timer
//! let sent = exporter.publish(spans).await?; // explicit, reports the outcome
//! exporter.close().await?;
//! ```

use crate::assembler::{AppendOutcome, AssemblerLimits, BatchAssembler};
use crate::codec::{JaegerCodec, SpanCodec, ZipkinCodec};
use crate::config::{Endpoint, ExporterConfig};
use crate::environment::EnvironmentSnapshot;
use crate::error::{ConfigError, EncodingError, ExportError, FlushResult, SetupError};
use crate::metrics::{ExportMetrics, FlushObserver, FlushTrigger, LoggingObserver};
use crate::scheduler::{Appended, FlushScheduler, SchedulerConfig, SchedulerState};
use crate::span::Span;
use crate::transport::{HttpTransport, SpanTransportBoxed, UdpTransport};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Interface the host tracer calls into.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// `Box<dyn ExporterBoxed>`.
pub trait Exporter: Send + Sync {
    /// Hands a finished span to the exporter.
    ///
    /// Returns once the span is buffered. If the span forced the previous batch
    /// out, waits for that send first. Failures are reported through logs and
    /// metrics, never to the caller.
    fn on_span_finished(&self, span: Span) -> impl Future<Output = ()> + Send;

    /// Sends `spans` now and reports how many reached the transport.
    fn publish(&self, spans: Vec<Span>) -> impl Future<Output = FlushResult> + Send;

    /// Sends everything buffered and releases the transport.
    fn close(&self) -> impl Future<Output = FlushResult> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of Exporter for dynamic dispatch.
pub trait ExporterBoxed: Send + Sync {
    fn on_span_finished_boxed(&self, span: Span) -> BoxFuture<'_, ()>;

    fn publish_boxed(&self, spans: Vec<Span>) -> BoxFuture<'_, FlushResult>;

    fn close_boxed(&self) -> BoxFuture<'_, FlushResult>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Exporter can be used as ExporterBoxed
impl<T: Exporter> ExporterBoxed for T {
    fn on_span_finished_boxed(&self, span: Span) -> BoxFuture<'_, ()> {
        Box::pin(self.on_span_finished(span))
    }

    fn publish_boxed(&self, spans: Vec<Span>) -> BoxFuture<'_, FlushResult> {
        Box::pin(self.publish(spans))
    }

    fn close_boxed(&self) -> BoxFuture<'_, FlushResult> {
        Box::pin(self.close())
    }

    fn name(&self) -> &str {
        Exporter::name(self)
    }
}

/// Size- and time-bounded batching exporter over any codec and transport.
pub struct BatchingExporter {
    name: String,
    codec: Arc<dyn SpanCodec>,
    limits: AssemblerLimits,
    scheduler: FlushScheduler,
    metrics: Arc<ExportMetrics>,
}

impl BatchingExporter {
    /// Creates an exporter that reports background flushes through `tracing`.
    ///
    /// Spawns the flush worker, so it must be called within a tokio runtime.
    pub fn new(
        config: &ExporterConfig,
        codec: Arc<dyn SpanCodec>,
        transport: Arc<dyn SpanTransportBoxed>,
    ) -> Result<Self, ConfigError> {
        Self::with_observer(config, codec, transport, Arc::new(LoggingObserver))
    }

    /// Creates an exporter with a custom observer for background flush outcomes.
    pub fn with_observer(
        config: &ExporterConfig,
        codec: Arc<dyn SpanCodec>,
        transport: Arc<dyn SpanTransportBoxed>,
        observer: Arc<dyn FlushObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limits = AssemblerLimits::for_codec(
            codec.as_ref(),
            config.max_batch_bytes,
            config.max_spans_per_batch,
        );
        if limits.envelope_overhead >= limits.max_batch_bytes {
            return Err(ConfigError::InvalidLimit {
                name: "maxPacketSize",
                reason: format!(
                    "{} bytes leaves no room after the {} byte envelope",
                    limits.max_batch_bytes, limits.envelope_overhead
                ),
            });
        }

        let name = format!("{}/{}", codec.name(), transport.name());
        let metrics = Arc::new(ExportMetrics::default());
        let scheduler = FlushScheduler::start(
            BatchAssembler::new(limits),
            transport,
            SchedulerConfig {
                flush_interval: config.flush_interval,
                shutdown_timeout: config.shutdown_timeout,
            },
            observer,
            Arc::clone(&metrics),
        );
        tracing::debug!(
            exporter = %name,
            service = %config.service_name,
            max_batch_bytes = limits.max_batch_bytes,
            max_spans_per_batch = limits.max_spans_per_batch,
            "exporter started"
        );

        Ok(Self {
            name,
            codec,
            limits,
            scheduler,
            metrics,
        })
    }

    /// Jaeger thrift over UDP to the configured agent.
    pub async fn jaeger(
        config: &ExporterConfig,
        environment: &EnvironmentSnapshot,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let Endpoint::Agent { host, port } = &config.endpoint else {
            return Err(ConfigError::InvalidEndpoint(
                "jaeger exporter needs an agent host and port".to_string(),
            )
            .into());
        };

        let codec: Arc<dyn SpanCodec> = Arc::new(JaegerCodec::new(
            &config.service_name,
            environment.merge_tags(&config.tags),
        ));
        let transport =
            UdpTransport::connect(host, *port, Arc::clone(&codec), config.max_batch_bytes).await?;
        Ok(Self::new(config, codec, Arc::new(transport))?)
    }

    /// Zipkin v2 JSON over HTTP to the configured collector URL.
    pub fn zipkin(
        config: &ExporterConfig,
        environment: &EnvironmentSnapshot,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let Endpoint::Collector { url } = &config.endpoint else {
            return Err(ConfigError::InvalidEndpoint(
                "zipkin exporter needs a collector url".to_string(),
            )
            .into());
        };

        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new(
            &config.service_name,
            environment.merge_tags(&config.tags),
        ));
        let transport = HttpTransport::new(url.clone(), Arc::clone(&codec), config.request_timeout)?;
        Ok(Self::new(config, codec, Arc::new(transport))?)
    }

    /// Sends everything currently buffered.
    pub async fn flush(&self) -> FlushResult {
        self.scheduler.flush(FlushTrigger::Explicit).await
    }

    pub fn metrics(&self) -> &ExportMetrics {
        &self.metrics
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Spans waiting in the shared buffer
    pub fn pending_spans(&self) -> usize {
        self.scheduler.pending_count()
    }

    // Spans a failed publish never handed to the worker are lost. A batch the
    // worker did attempt was already counted when its send failed.
    fn publish_failed(&self, unsent: usize, batch_len: usize, error: ExportError) -> ExportError {
        let lost = match error {
            ExportError::Closed => unsent + batch_len,
            _ => unsent,
        };
        if lost > 0 {
            tracing::warn!(exporter = %self.name, lost, %error, "publish stopped early");
            self.metrics.record_lost(lost as u64);
        }
        error
    }

    fn drop_span(&self, span: &Span, error: &ExportError) {
        self.metrics.record_dropped();
        match error {
            ExportError::Closed => {
                tracing::debug!(span = %span.name, "exporter closed, span dropped");
            }
            _ => tracing::warn!(span = %span.name, %error, "span dropped"),
        }
    }
}

impl Exporter for BatchingExporter {
    async fn on_span_finished(&self, span: Span) {
        let record = match self.codec.encode(&span) {
            Ok(record) => record,
            Err(e) => return self.drop_span(&span, &e.into()),
        };
        match self.scheduler.append(record) {
            Ok(Appended::Buffered) => {}
            Ok(Appended::Flushing(rx)) => {
                // The outcome already went to the observer.
                let _ = rx.await;
            }
            Err(e) => self.drop_span(&span, &e),
        }
    }

    async fn publish(&self, spans: Vec<Span>) -> FlushResult {
        if self.scheduler.is_closed() {
            return Err(ExportError::Closed);
        }
        if spans.is_empty() {
            return Ok(0);
        }

        let mut assembler = BatchAssembler::new(self.limits);
        let mut sent = 0;
        for (index, span) in spans.iter().enumerate() {
            let record = match self.codec.encode(span) {
                Ok(record) => record,
                Err(e) => {
                    self.drop_span(span, &e.into());
                    continue;
                }
            };
            match assembler.append(record) {
                AppendOutcome::Accepted => {}
                AppendOutcome::FlushRequired(batch) => {
                    let batch_len = batch.len();
                    match self.scheduler.submit(FlushTrigger::Publish, batch).await {
                        Ok(n) => sent += n,
                        Err(error) => {
                            let unsent = assembler.pending_count() + (spans.len() - index - 1);
                            return Err(self.publish_failed(unsent, batch_len, error));
                        }
                    }
                }
                AppendOutcome::RejectedTooLarge { size, limit } => {
                    self.drop_span(span, &EncodingError::RecordTooLarge { size, limit }.into());
                }
            }
        }
        if !assembler.is_empty() {
            let batch = assembler.drain();
            let batch_len = batch.len();
            match self.scheduler.submit(FlushTrigger::Publish, batch).await {
                Ok(n) => sent += n,
                Err(error) => return Err(self.publish_failed(0, batch_len, error)),
            }
        }
        Ok(sent)
    }

    async fn close(&self) -> FlushResult {
        let result = self.scheduler.close().await;
        match &result {
            Ok(spans) => tracing::debug!(exporter = %self.name, spans, "exporter closed"),
            Err(error) => tracing::warn!(exporter = %self.name, %error, "exporter closed with loss"),
        }
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
