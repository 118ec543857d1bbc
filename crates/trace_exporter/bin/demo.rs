//! # Trace Exporter Demo
//!
//! Drives a [`BatchingExporter`] end to end against a real collector: several
//! producer tasks finish spans concurrently, a few spans go through `publish`,
//! and the exporter is closed at the end.
//!
//! ## Running
//!
//! ```bash
//! # Jaeger agent on localhost:6832 (UDP)
//! cargo run -p trace_exporter --bin demo -- --quick
//!
//! # A different agent
//! cargo run -p trace_exporter --bin demo -- --agent jaeger.local:6832
//!
//! # Zipkin collector over HTTP
//! cargo run -p trace_exporter --bin demo -- --zipkin http://localhost:9411/api/v2/spans
//!
//! # Options from a JSON file (serviceName, flushIntervalMs, url or host/port, ...)
//! cargo run -p trace_exporter --bin demo -- --config exporter.json
//! ```
//!
//! Set `RUST_LOG=trace_exporter=debug` to see every flush.

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use trace_exporter::{
    BatchingExporter, Endpoint, EnvironmentSnapshot, Exporter, ExporterConfig, Span, SpanKind,
    Tag,
};
use tracing_subscriber::EnvFilter;

const OPERATIONS: &[(&str, SpanKind)] = &[
    ("GET /checkout", SpanKind::Server),
    ("SELECT orders", SpanKind::Client),
    ("cache.get", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
    ("render", SpanKind::Internal),
];

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn build_config(args: &[String]) -> Result<ExporterConfig, Box<dyn std::error::Error>> {
    if let Some(path) = arg_value(args, "--config") {
        let json = std::fs::read_to_string(path)?;
        return Ok(ExporterConfig::from_json(&json)?);
    }

    let endpoint = match (arg_value(args, "--zipkin"), arg_value(args, "--agent")) {
        (Some(url), _) => Endpoint::collector(&url)?,
        (None, Some(agent)) => {
            let (host, port) = agent
                .rsplit_once(':')
                .ok_or("--agent expects host:port")?;
            Endpoint::agent(host, port.parse()?)
        }
        (None, None) => Endpoint::default(),
    };

    Ok(ExporterConfig::new("trace-exporter-demo")
        .with_tags(vec![Tag::new("demo", true)])
        .with_flush_interval(Duration::from_secs(1))
        .with_endpoint(endpoint))
}

fn random_span(trace_id: u128, span_id: u64, parent: Option<u64>) -> Span {
    let mut rng = rand::thread_rng();
    let (name, kind) = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let duration = Duration::from_micros(rng.gen_range(50..50_000));
    let start = SystemTime::now() - duration;

    let mut span = Span::new(trace_id, span_id, name)
        .with_kind(kind)
        .with_timing(start, duration);
    if let Some(parent) = parent {
        span = span.with_parent(parent);
    }
    span.set_attribute("demo.sequence", span_id as i64);
    if rng.gen_bool(0.1) {
        span.set_attribute("error", true);
    }
    span
}

async fn run_producer(exporter: Arc<BatchingExporter>, producer_id: u64, traces: u64) -> u64 {
    let mut finished = 0;
    for seq in 0..traces {
        let trace_id = (u128::from(producer_id) << 64) | u128::from(seq);
        let root_id = (producer_id << 32) | (seq << 8);
        let children = rand::thread_rng().gen_range(1..6);

        for child in 1..=children {
            let span = random_span(trace_id, root_id | child, Some(root_id));
            exporter.on_span_finished(span).await;
            finished += 1;
        }
        exporter
            .on_span_finished(random_span(trace_id, root_id, None))
            .await;
        finished += 1;

        let pause = Duration::from_millis(rand::thread_rng().gen_range(1..10));
        tokio::time::sleep(pause).await;
    }
    finished
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.contains(&"--quick".to_string());
    let (num_producers, traces_per_producer) = if quick { (2, 20) } else { (8, 200) };

    let config = build_config(&args)?;
    let environment = EnvironmentSnapshot::collect();
    let exporter = match &config.endpoint {
        Endpoint::Agent { .. } => BatchingExporter::jaeger(&config, &environment).await?,
        Endpoint::Collector { .. } => BatchingExporter::zipkin(&config, &environment)?,
    };
    let exporter = Arc::new(exporter);

    tracing::info!(
        exporter = exporter.name(),
        endpoint = ?config.endpoint,
        host = %environment.hostname,
        producers = num_producers,
        traces_per_producer,
        "starting demo"
    );

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(num_producers as usize);
    for producer_id in 0..num_producers {
        tasks.push(tokio::spawn(run_producer(
            Arc::clone(&exporter),
            producer_id,
            traces_per_producer,
        )));
    }

    let mut finished = 0;
    for task in tasks {
        finished += task.await?;
    }

    // The bulk path reports its outcome directly
    let batch: Vec<Span> = (0..10)
        .map(|i| random_span(u128::MAX - 1, 0xFFFF_0000 + i, None))
        .collect();
    match exporter.publish(batch).await {
        Ok(sent) => tracing::info!(sent, "publish succeeded"),
        Err(error) => tracing::warn!(%error, "publish failed"),
    }

    let closed = exporter.close().await;
    let metrics = exporter.metrics();
    tracing::info!(
        finished,
        exported = metrics.spans_exported(),
        batches = metrics.batches_exported(),
        errors = metrics.export_errors(),
        dropped = metrics.spans_dropped(),
        lost = metrics.spans_lost(),
        elapsed = ?started.elapsed(),
        "demo complete"
    );
    closed?;
    Ok(())
}
