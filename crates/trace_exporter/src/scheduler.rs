//! Flush Scheduler
//!
//! Drives batch assembly for one exporter. A single background task owns every
//! transport call, so at most one send is in flight per exporter.
//!
//! ```text
//!            timer tick / threshold / flush()
//!   ┌──────┐ ───────────────────────────────► ┌──────────┐
//!   │ Idle │                                  │ Flushing │
//!   └──────┘ ◄─────────────────────────────── └──────────┘
//!      │         send finished (ok or err)         │
//!      │ close()                                   │ close() (waits in FIFO)
//!      ▼                                           ▼
//!   ┌────────┐
//!   │ Closed │
//!   └────────┘
//! ```
//!
//! Every batch, whichever trigger produced it, is pushed into one FIFO command
//! channel while the assembler lock is held. The channel order therefore matches
//! the order in which batches were sealed, and producers only hold the lock for
//! the append itself, never for the network call.

use crate::assembler::{AppendOutcome, Batch, BatchAssembler};
use crate::codec::EncodedRecord;
use crate::error::{EncodingError, ExportError, FlushResult};
use crate::metrics::{ExportMetrics, FlushObserver, FlushTrigger};
use crate::transport::SpanTransportBoxed;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Lifecycle of the flush pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Flushing,
    Closed,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Flushing,
            _ => SchedulerState::Closed,
        }
    }
}

/// Outcome of appending through the scheduler
#[derive(Debug)]
pub enum Appended {
    /// The record is buffered
    Buffered,
    /// The record forced the previous batch out; resolves when that send finishes
    Flushing(oneshot::Receiver<FlushResult>),
}

enum Command {
    Flush {
        trigger: FlushTrigger,
        batch: Batch,
        reply: Option<oneshot::Sender<FlushResult>>,
    },
    Shutdown,
}

// Everything guarded by the assembler lock.
struct Buffer {
    assembler: BatchAssembler,
    closed: bool,
    commands: mpsc::UnboundedSender<Command>,
    // Spans queued for the worker whose send has not finished yet
    unanswered: Arc<AtomicUsize>,
}

impl Buffer {
    fn enqueue(
        &self,
        trigger: FlushTrigger,
        batch: Batch,
        reply: Option<oneshot::Sender<FlushResult>>,
    ) -> Result<(), ExportError> {
        let spans = batch.len();
        // Counted before the send so the worker never subtracts first
        self.unanswered.fetch_add(spans, Ordering::AcqRel);
        let sent = self.commands.send(Command::Flush {
            trigger,
            batch,
            reply,
        });
        if sent.is_err() {
            self.unanswered.fetch_sub(spans, Ordering::AcqRel);
            return Err(ExportError::WorkerGone);
        }
        Ok(())
    }

    fn enqueue_with_reply(
        &self,
        trigger: FlushTrigger,
        batch: Batch,
    ) -> Result<oneshot::Receiver<FlushResult>, ExportError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(trigger, batch, Some(tx))?;
        Ok(rx)
    }
}

fn lock(buffer: &Mutex<Buffer>) -> MutexGuard<'_, Buffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for the flush worker
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Period of the background flush timer
    pub flush_interval: Duration,
    /// Bound on the final flush performed by `close()`
    pub shutdown_timeout: Duration,
}

/// Owns the shared assembler and the single flush worker task.
pub struct FlushScheduler {
    buffer: Arc<Mutex<Buffer>>,
    state: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
    unanswered: Arc<AtomicUsize>,
    shutdown_timeout: Duration,
    metrics: Arc<ExportMetrics>,
}

impl FlushScheduler {
    /// Starts the flush worker. Must be called within a tokio runtime.
    pub fn start(
        assembler: BatchAssembler,
        transport: Arc<dyn SpanTransportBoxed>,
        config: SchedulerConfig,
        observer: Arc<dyn FlushObserver>,
        metrics: Arc<ExportMetrics>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let unanswered = Arc::new(AtomicUsize::new(0));
        let buffer = Arc::new(Mutex::new(Buffer {
            assembler,
            closed: false,
            commands,
            unanswered: Arc::clone(&unanswered),
        }));
        let state = Arc::new(AtomicU8::new(SchedulerState::Idle as u8));

        let worker = Worker {
            buffer: Arc::clone(&buffer),
            state: Arc::clone(&state),
            unanswered: Arc::clone(&unanswered),
            transport,
            observer,
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(rx, config.flush_interval));

        Self {
            buffer,
            state,
            worker: Mutex::new(Some(handle)),
            unanswered,
            shutdown_timeout: config.shutdown_timeout,
            metrics,
        }
    }

    /// Appends a record to the shared buffer.
    ///
    /// When the record forces the current batch out, the sealed batch is queued
    /// before the lock is released and the caller gets a receiver for its result.
    pub fn append(&self, record: EncodedRecord) -> Result<Appended, ExportError> {
        let mut buffer = lock(&self.buffer);
        if buffer.closed {
            return Err(ExportError::Closed);
        }
        match buffer.assembler.append(record) {
            AppendOutcome::Accepted => Ok(Appended::Buffered),
            AppendOutcome::FlushRequired(sealed) => {
                let rx = buffer.enqueue_with_reply(FlushTrigger::Threshold, sealed)?;
                Ok(Appended::Flushing(rx))
            }
            AppendOutcome::RejectedTooLarge { size, limit } => {
                Err(EncodingError::RecordTooLarge { size, limit }.into())
            }
        }
    }

    /// Drains the shared buffer and waits for the send.
    pub async fn flush(&self, trigger: FlushTrigger) -> FlushResult {
        let rx = {
            let mut buffer = lock(&self.buffer);
            if buffer.closed {
                return Err(ExportError::Closed);
            }
            let batch = buffer.assembler.drain();
            buffer.enqueue_with_reply(trigger, batch)?
        };
        rx.await.map_err(|_| ExportError::WorkerGone)?
    }

    /// Sends a batch assembled outside the shared buffer and waits for the result.
    pub async fn submit(&self, trigger: FlushTrigger, mut batch: Batch) -> FlushResult {
        let rx = {
            let mut buffer = lock(&self.buffer);
            if buffer.closed {
                return Err(ExportError::Closed);
            }
            batch.set_sequence(buffer.assembler.claim_sequence());
            buffer.enqueue_with_reply(trigger, batch)?
        };
        rx.await.map_err(|_| ExportError::WorkerGone)?
    }

    /// Stops accepting records, sends what is buffered, and stops the worker.
    ///
    /// Waits behind any send already in flight, bounded by the shutdown timeout.
    /// Calling `close` again returns `Ok(0)`.
    pub async fn close(&self) -> FlushResult {
        let (rx, pending) = {
            let mut buffer = lock(&self.buffer);
            if buffer.closed {
                return Ok(0);
            }
            buffer.closed = true;
            let batch = buffer.assembler.drain();
            let pending = batch.len();
            let rx = buffer.enqueue_with_reply(FlushTrigger::Shutdown, batch);
            // The worker exits after the final flush; nothing can be queued behind it.
            let _ = buffer.commands.send(Command::Shutdown);
            (rx, pending)
        };
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let abort = handle.as_ref().map(JoinHandle::abort_handle);

        let rx = match rx {
            Ok(rx) => rx,
            Err(e) => {
                self.metrics.record_lost(pending as u64);
                self.state
                    .store(SchedulerState::Closed as u8, Ordering::Release);
                return Err(e);
            }
        };

        let finished = tokio::time::timeout(self.shutdown_timeout, async move {
            let result = rx.await.map_err(|_| ExportError::WorkerGone)?;
            if let Some(handle) = handle {
                // The worker exits right after answering the final flush.
                let _ = handle.await;
            }
            result
        })
        .await;

        let result = match finished {
            Ok(result) => result,
            Err(_) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                // The final batch plus anything in flight or still queued ahead of it
                let lost = self.unanswered.swap(0, Ordering::AcqRel);
                tracing::warn!(
                    lost,
                    timeout = ?self.shutdown_timeout,
                    "final flush timed out"
                );
                self.metrics.record_lost(lost as u64);
                Err(ExportError::ShutdownTimeout { lost })
            }
        };
        self.state
            .store(SchedulerState::Closed as u8, Ordering::Release);
        result
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.buffer).closed
    }

    /// Records currently waiting in the shared buffer
    pub fn pending_count(&self) -> usize {
        lock(&self.buffer).assembler.pending_count()
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        let buffer = lock(&self.buffer);
        if !buffer.closed {
            let lost = buffer.assembler.pending_count() + self.unanswered.load(Ordering::Acquire);
            if lost > 0 {
                tracing::warn!(lost, "flush scheduler dropped without close, spans discarded");
                self.metrics.record_lost(lost as u64);
            }
        }
        drop(buffer);

        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

struct Worker {
    buffer: Arc<Mutex<Buffer>>,
    state: Arc<AtomicU8>,
    unanswered: Arc<AtomicUsize>,
    transport: Arc<dyn SpanTransportBoxed>,
    observer: Arc<dyn FlushObserver>,
    metrics: Arc<ExportMetrics>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = rx.recv() => match command {
                    Some(Command::Flush { trigger, batch, reply }) => {
                        let result = self.send(trigger, batch).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },

                _ = ticker.tick() => {
                    let mut buffer = lock(&self.buffer);
                    if !buffer.closed && buffer.assembler.should_flush(period) {
                        let batch = buffer.assembler.drain();
                        // Queued behind anything sealed earlier; picked up next iteration.
                        if buffer.enqueue(FlushTrigger::Timer, batch, None).is_err() {
                            break;
                        }
                    }
                }
            }
        }
        self.state
            .store(SchedulerState::Closed as u8, Ordering::Release);
    }

    async fn send(&self, trigger: FlushTrigger, batch: Batch) -> FlushResult {
        let sequence = batch.sequence();
        let spans = batch.len() as u64;

        self.state
            .store(SchedulerState::Flushing as u8, Ordering::Release);
        self.metrics.inc_inflight();
        let result = self
            .transport
            .send_boxed(batch)
            .await
            .map_err(ExportError::from);
        self.metrics.dec_inflight();
        // Saturating: a timed-out close may already have claimed these as lost.
        let _ = self
            .unanswered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(spans as usize))
            });

        match &result {
            Ok(sent) if *sent > 0 => self.metrics.record_success(*sent as u64),
            Ok(_) => {}
            Err(_) => self.metrics.record_error(spans),
        }
        self.observer.on_flush(trigger, sequence, &result);
        self.state
            .store(SchedulerState::Idle as u8, Ordering::Release);
        result
    }
}
