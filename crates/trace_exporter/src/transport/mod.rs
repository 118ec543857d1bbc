//! Transport senders.
//!
//! A transport delivers one assembled [`Batch`] per call as a single physical
//! transmission and reports how many spans it carried. Transports never retry;
//! retry policy belongs to the host.

pub mod http;
pub mod udp;

use crate::assembler::Batch;
use crate::error::TransportError;
use std::future::Future;
use std::pin::Pin;

pub use http::HttpTransport;
pub use udp::UdpTransport;

/// Trait for delivering batches to a collector.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// `Arc<dyn SpanTransportBoxed>`.
pub trait SpanTransport: Send + Sync {
    /// Sends one batch. An empty batch is a successful no-op.
    fn send(&self, batch: Batch) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of SpanTransport for dynamic dispatch.
pub trait SpanTransportBoxed: Send + Sync {
    /// Sends one batch (boxed future for object safety).
    fn send_boxed(
        &self,
        batch: Batch,
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + '_>>;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any SpanTransport can be used as SpanTransportBoxed
impl<T: SpanTransport> SpanTransportBoxed for T {
    fn send_boxed(
        &self,
        batch: Batch,
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + '_>> {
        Box::pin(self.send(batch))
    }

    fn name(&self) -> &str {
        SpanTransport::name(self)
    }
}

/// In-memory transports for scheduler and exporter tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every batch it is asked to send
    #[derive(Default)]
    pub struct RecordingTransport {
        batches: Mutex<Vec<Batch>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn batches(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }

        pub fn send_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        pub fn span_count(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Batch::len).sum()
        }
    }

    impl SpanTransport for RecordingTransport {
        async fn send(&self, batch: Batch) -> Result<usize, TransportError> {
            let spans = batch.len();
            self.batches.lock().unwrap().push(batch);
            Ok(spans)
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Fails every call
    #[derive(Default)]
    pub struct FailingTransport {
        calls: AtomicUsize,
    }

    impl FailingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SpanTransport for FailingTransport {
        async fn send(&self, _batch: Batch) -> Result<usize, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::DeliveryFailed {
                status: Some(503),
                reason: "Service Unavailable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Sleeps before recording, and tracks how many sends overlap
    pub struct SlowTransport {
        delay: Duration,
        inner: RecordingTransport,
        inflight: AtomicUsize,
        max_inflight: AtomicUsize,
    }

    impl SlowTransport {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                inner: RecordingTransport::new(),
                inflight: AtomicUsize::new(0),
                max_inflight: AtomicUsize::new(0),
            }
        }

        pub fn span_count(&self) -> usize {
            self.inner.span_count()
        }

        pub fn send_count(&self) -> usize {
            self.inner.send_count()
        }

        pub fn max_inflight(&self) -> usize {
            self.max_inflight.load(Ordering::SeqCst)
        }
    }

    impl SpanTransport for SlowTransport {
        async fn send(&self, batch: Batch) -> Result<usize, TransportError> {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            self.inner.send(batch).await
        }

        fn name(&self) -> &str {
            "slow"
        }
    }
}
