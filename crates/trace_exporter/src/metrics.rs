use crate::error::FlushResult;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The periodic timer elapsed
    Timer,
    /// A size or count ceiling was reached
    Threshold,
    /// The host called `flush()`
    Explicit,
    /// A batch built by `publish()`
    Publish,
    /// The final flush performed by `close()`
    Shutdown,
}

/// Hook for flush outcomes that never reach a caller (timer and threshold flushes).
pub trait FlushObserver: Send + Sync {
    fn on_flush(&self, trigger: FlushTrigger, sequence: u64, result: &FlushResult);
}

/// Default observer: reports every flush through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl FlushObserver for LoggingObserver {
    fn on_flush(&self, trigger: FlushTrigger, sequence: u64, result: &FlushResult) {
        match result {
            Ok(spans) => tracing::debug!(?trigger, sequence, spans, "flushed batch"),
            Err(error) => tracing::error!(?trigger, sequence, %error, "batch lost"),
        }
    }
}

/// Thread-safe export counters (uses atomics)
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Total spans delivered to the transport
    pub spans_exported: AtomicU64,
    /// Total batches delivered
    pub batches_exported: AtomicU64,
    /// Total failed batch sends
    pub export_errors: AtomicU64,
    /// Spans dropped before buffering (encoding errors, oversized records, closed exporter)
    pub spans_dropped: AtomicU64,
    /// Spans in batches that failed to send or were abandoned at shutdown
    pub spans_lost: AtomicU64,
    /// Current in-flight sends (0 or 1)
    pub inflight_sends: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn spans_lost(&self) -> u64 {
        self.spans_lost.load(Ordering::Relaxed)
    }

    pub fn inflight_sends(&self) -> u64 {
        self.inflight_sends.load(Ordering::Relaxed)
    }

    pub(crate) fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, span_count: u64) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
        self.spans_lost.fetch_add(span_count, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.spans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self, span_count: u64) {
        self.spans_lost.fetch_add(span_count, Ordering::Relaxed);
    }

    pub(crate) fn inc_inflight(&self) {
        self.inflight_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_inflight(&self) {
        self.inflight_sends.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;

    #[test]
    fn test_counters() {
        let metrics = ExportMetrics::default();
        metrics.record_success(5);
        metrics.record_success(2);
        metrics.record_error(3);
        metrics.record_dropped();

        assert_eq!(metrics.spans_exported(), 7);
        assert_eq!(metrics.batches_exported(), 2);
        assert_eq!(metrics.export_errors(), 1);
        assert_eq!(metrics.spans_lost(), 3);
        assert_eq!(metrics.spans_dropped(), 1);
    }

    #[test]
    fn test_logging_observer_accepts_both_outcomes() {
        let observer = LoggingObserver;
        observer.on_flush(FlushTrigger::Timer, 1, &Ok(3));
        observer.on_flush(FlushTrigger::Shutdown, 2, &Err(ExportError::Closed));
    }
}
