use bytes::Bytes;
use httpmock::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use trace_exporter::{
    Batch, BatchingExporter, EncodedRecord, EncodingError, Endpoint, EnvironmentSnapshot,
    ExportError, Exporter, ExporterConfig, Span, SpanCodec, SpanTransport, Tag, TransportError,
};

/// Encodes only the span id, so tests can recover what was sent.
struct IdCodec;

impl SpanCodec for IdCodec {
    fn encode(&self, span: &Span) -> Result<EncodedRecord, EncodingError> {
        Ok(EncodedRecord::new(span.span_id.to_be_bytes().to_vec()))
    }

    fn frame(&self, batch: &Batch) -> Bytes {
        let mut out = Vec::with_capacity(batch.encoded_size());
        for record in batch.records() {
            out.extend_from_slice(record.as_bytes());
        }
        out.into()
    }

    fn envelope_overhead(&self) -> usize {
        0
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn name(&self) -> &str {
        "id"
    }
}

fn span_ids(batch: &Batch) -> Vec<u64> {
    batch
        .records()
        .iter()
        .map(|r| {
            let mut id = [0u8; 8];
            id.copy_from_slice(r.as_bytes());
            u64::from_be_bytes(id)
        })
        .collect()
}

struct TestTransport {
    batches: Mutex<Vec<Vec<u64>>>,
}

impl TestTransport {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    fn exported_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn spans_by_producer(&self, producer_id: u64) -> Vec<u64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .copied()
            .filter(|id| id >> 48 == producer_id)
            .collect()
    }
}

impl SpanTransport for TestTransport {
    async fn send(&self, batch: Batch) -> Result<usize, TransportError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.batches.lock().unwrap().push(span_ids(&batch));
        Ok(batch.len())
    }

    fn name(&self) -> &str {
        "test"
    }
}

// Slow transport for back-pressure testing
struct SlowTransport {
    delay: Duration,
    inner: TestTransport,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

impl SlowTransport {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: TestTransport::new(),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
        }
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

fn create_test_span(producer_id: u64, seq: u64) -> Span {
    Span::new(1, producer_id << 48 | seq, format!("op-{}", seq))
}

fn config(max_spans_per_batch: usize) -> ExporterConfig {
    ExporterConfig::new("integration")
        .with_max_spans_per_batch(max_spans_per_batch)
        .with_flush_interval(Duration::from_millis(50))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let transport = Arc::new(TestTransport::new());
    let exporter = Arc::new(
        BatchingExporter::new(&config(64), Arc::new(IdCodec), transport.clone()).unwrap(),
    );

    let mut tasks = vec![];
    for producer_id in 0..8 {
        let exporter = Arc::clone(&exporter);
        tasks.push(tokio::spawn(async move {
            for seq in 0..1_000 {
                exporter
                    .on_span_finished(create_test_span(producer_id, seq))
                    .await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    exporter.close().await.unwrap();

    assert_eq!(transport.exported_count(), 8_000);
    assert_eq!(exporter.metrics().spans_exported(), 8_000);
    assert_eq!(exporter.metrics().spans_lost(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_ordering_per_producer() {
    let transport = Arc::new(TestTransport::new());
    let exporter = Arc::new(
        BatchingExporter::new(&config(10), Arc::new(IdCodec), transport.clone()).unwrap(),
    );

    let mut tasks = vec![];
    for producer_id in 0..4 {
        let exporter = Arc::clone(&exporter);
        tasks.push(tokio::spawn(async move {
            for seq in 0..500 {
                exporter
                    .on_span_finished(create_test_span(producer_id, seq))
                    .await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    exporter.close().await.unwrap();

    for producer_id in 0..4 {
        let seqs: Vec<u64> = transport
            .spans_by_producer(producer_id)
            .iter()
            .map(|id| id & 0xFFFF_FFFF_FFFF)
            .collect();
        assert_eq!(seqs, (0..500).collect::<Vec<_>>(), "producer {}", producer_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backpressure_keeps_one_send_in_flight() {
    let transport = Arc::new(SlowTransport::new(Duration::from_millis(5)));
    let exporter = Arc::new(
        BatchingExporter::new(&config(5), Arc::new(IdCodec), transport.clone()).unwrap(),
    );

    let mut tasks = vec![];
    for producer_id in 0..4 {
        let exporter = Arc::clone(&exporter);
        tasks.push(tokio::spawn(async move {
            for seq in 0..50 {
                exporter
                    .on_span_finished(create_test_span(producer_id, seq))
                    .await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    exporter.close().await.unwrap();

    assert_eq!(transport.inner.exported_count(), 200);
    assert_eq!(transport.max_inflight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timer_flushes_idle_buffer() {
    let transport = Arc::new(TestTransport::new());
    let exporter =
        BatchingExporter::new(&config(100), Arc::new(IdCodec), transport.clone()).unwrap();

    exporter.on_span_finished(create_test_span(0, 1)).await;
    exporter.on_span_finished(create_test_span(0, 2)).await;
    assert_eq!(transport.batch_count(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.exported_count(), 2);
    assert_eq!(exporter.pending_spans(), 0);
    exporter.close().await.unwrap();
}

#[tokio::test]
async fn test_graceful_close_drains_buffer() {
    let transport = Arc::new(TestTransport::new());
    let config = config(1_000).with_flush_interval(Duration::from_secs(3600));
    let exporter = BatchingExporter::new(&config, Arc::new(IdCodec), transport.clone()).unwrap();

    for seq in 0..250 {
        exporter.on_span_finished(create_test_span(0, seq)).await;
    }
    assert_eq!(transport.exported_count(), 0);

    assert_eq!(exporter.close().await, Ok(250));
    assert_eq!(transport.exported_count(), 250);
    assert_eq!(exporter.pending_spans(), 0);
    assert_eq!(
        exporter.publish(vec![create_test_span(0, 999)]).await,
        Err(ExportError::Closed)
    );
}

#[tokio::test]
async fn test_close_gives_up_on_stuck_transport() {
    let transport = Arc::new(SlowTransport::new(Duration::from_secs(30)));
    let config = config(100)
        .with_flush_interval(Duration::from_secs(3600))
        .with_shutdown_timeout(Duration::from_millis(100));
    let exporter = BatchingExporter::new(&config, Arc::new(IdCodec), transport.clone()).unwrap();

    for seq in 0..3 {
        exporter.on_span_finished(create_test_span(0, seq)).await;
    }

    let started = std::time::Instant::now();
    assert_eq!(
        exporter.close().await,
        Err(ExportError::ShutdownTimeout { lost: 3 })
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(exporter.metrics().spans_lost(), 3);
}

#[tokio::test]
async fn test_jaeger_over_udp_end_to_end() {
    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = agent.local_addr().unwrap().port();

    let config = ExporterConfig::new("checkout")
        .with_tags(vec![Tag::new("region", "eu-west-1")])
        .with_endpoint(Endpoint::agent("127.0.0.1", port))
        .with_flush_interval(Duration::from_secs(3600));
    let env = EnvironmentSnapshot::fixed("Rust-test", "test-host", None);
    let exporter = BatchingExporter::jaeger(&config, &env).await.unwrap();

    for id in 1..=3 {
        let span = Span::new(7, id, "charge").with_parent(100);
        exporter.on_span_finished(span).await;
    }
    assert_eq!(exporter.close().await, Ok(3));

    let mut buf = vec![0u8; 65_536];
    let n = tokio::time::timeout(Duration::from_secs(2), agent.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let datagram = &buf[..n];

    assert!(n <= config.max_batch_bytes);
    // Compact protocol id, then oneway message type with version 1
    assert_eq!(&datagram[..2], &[0x82, 0x81]);
    let contains = |needle: &[u8]| datagram.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"emitBatch"));
    assert!(contains(b"checkout"));
    assert!(contains(b"test-host"));
    assert!(contains(b"eu-west-1"));
    assert!(contains(b"charge"));
}

#[tokio::test]
async fn test_zipkin_over_http_end_to_end() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/spans")
                .header("content-type", "application/json")
                .body_contains("\"localEndpoint\":{\"serviceName\":\"checkout\"}")
                .body_contains("\"hostname\":\"test-host\"");
            then.status(202);
        })
        .await;

    let json = format!(
        r#"{{"serviceName": "checkout", "url": "{}", "maxSpansPerBatch": 10}}"#,
        server.url("/api/v2/spans")
    );
    let config = ExporterConfig::from_json(&json).unwrap();
    let env = EnvironmentSnapshot::fixed("Rust-test", "test-host", None);
    let exporter = BatchingExporter::zipkin(&config, &env).unwrap();

    let spans = (1..=25).map(|id| Span::new(9, id, "lookup")).collect();
    assert_eq!(exporter.publish(spans).await, Ok(25));
    mock.assert_hits_async(3).await;

    assert_eq!(exporter.close().await, Ok(0));
}

#[tokio::test]
async fn test_zipkin_collector_failure_surfaces_on_publish() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(503);
        })
        .await;

    let config = ExporterConfig::new("checkout").with_endpoint(
        Endpoint::collector(&server.url("/api/v2/spans")).unwrap(),
    );
    let env = EnvironmentSnapshot::fixed("Rust-test", "test-host", None);
    let exporter = BatchingExporter::zipkin(&config, &env).unwrap();

    let result = exporter.publish(vec![Span::new(9, 1, "lookup")]).await;
    assert!(matches!(
        result,
        Err(ExportError::Transport(TransportError::DeliveryFailed {
            status: Some(503),
            ..
        }))
    ));
    assert_eq!(exporter.pending_spans(), 0);
    assert_eq!(exporter.metrics().export_errors(), 1);
}
