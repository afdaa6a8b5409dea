//! Batch processor: per-kind buffers drained by one worker task per kind.
//!
//! Producers only append to a buffer under a short lock. Each kind has a
//! single worker that owns all flushing for that kind, which keeps batches
//! FIFO and allows at most one send in flight per kind.

mod dispatch;
mod queue;
mod rate_limited;

pub(crate) use dispatch::{ActiveTransport, Dispatcher};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::ErrorClass;
use crate::record::{Batch, Record, RecordKind, Resource};
use crate::stats::PipelineStats;
use queue::{KindQueue, Push};

/// A drop summary is logged on the first overflow and every this many drops
/// after it.
pub(crate) const OVERFLOW_LOG_EVERY: u64 = 1024;

type FlushAck = oneshot::Sender<()>;

struct KindHandle {
    queue: Arc<KindQueue>,
    flush_tx: mpsc::UnboundedSender<FlushAck>,
}

pub(crate) struct BatchProcessor {
    kinds: Vec<KindHandle>,
    stats: Arc<PipelineStats>,
}

impl BatchProcessor {
    /// Create the buffers and spawn one worker per record kind.
    pub(crate) fn spawn(
        config: &BatchConfig,
        resource: Arc<Resource>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let mut kinds = Vec::with_capacity(RecordKind::ALL.len());
        let mut handles = Vec::with_capacity(RecordKind::ALL.len());

        for kind in RecordKind::ALL {
            let queue = Arc::new(KindQueue::new(kind, config.max_batch_size, config.hard_cap));
            let (flush_tx, flush_rx) = mpsc::unbounded_channel();
            let worker = KindWorker {
                queue: queue.clone(),
                resource: resource.clone(),
                dispatcher: dispatcher.clone(),
                max_batch_age: config.max_batch_age(),
            };
            handles.push(tokio::spawn(worker.run(flush_rx, cancel.clone())));
            kinds.push(KindHandle { queue, flush_tx });
        }

        (Self { kinds, stats }, handles)
    }

    fn handle(&self, kind: RecordKind) -> &KindHandle {
        match kind {
            RecordKind::Span => &self.kinds[0],
            RecordKind::Metric => &self.kinds[1],
        }
    }

    /// Buffer a record. Never blocks on I/O and never fails; overflow and
    /// post-shutdown records are counted as dropped.
    pub(crate) fn submit(&self, record: Record) {
        self.stats.record_submitted();
        let kind = record.kind();
        match self.handle(kind).queue.push(record) {
            Push::Accepted => {}
            Push::Overflowed => {
                let dropped = self.stats.record_dropped(1);
                self.stats.record_error(ErrorClass::BufferOverflow);
                if dropped == 1 || dropped % OVERFLOW_LOG_EVERY == 0 {
                    warn!(
                        signal = %kind,
                        dropped_total = dropped,
                        "Telemetry buffer full, dropping oldest records"
                    );
                }
            }
            Push::Closed => {
                self.stats.record_dropped(1);
                debug!(signal = %kind, "Pipeline shut down, record dropped");
            }
        }
    }

    /// Flush every kind and wait until the buffered batches were dispatched.
    pub(crate) async fn force_flush(&self) {
        let mut acks = Vec::with_capacity(self.kinds.len());
        for handle in &self.kinds {
            let (tx, rx) = oneshot::channel();
            if handle.flush_tx.send(tx).is_ok() {
                acks.push(rx);
            }
        }
        for ack in acks {
            // A closed channel means the worker already exited after its
            // final drain.
            let _ = ack.await;
        }
    }

    pub(crate) fn buffered(&self, kind: RecordKind) -> usize {
        self.handle(kind).queue.len()
    }

    /// Stop accepting records. Workers drain what is buffered once
    /// cancelled.
    pub(crate) fn close(&self) {
        for handle in &self.kinds {
            handle.queue.close();
        }
    }
}

struct KindWorker {
    queue: Arc<KindQueue>,
    resource: Arc<Resource>,
    dispatcher: Arc<Dispatcher>,
    max_batch_age: Duration,
}

impl KindWorker {
    async fn run(self, mut flush_rx: mpsc::UnboundedReceiver<FlushAck>, cancel: CancellationToken) {
        let kind = self.queue.kind();
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.max_batch_age, self.max_batch_age);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(signal = %kind, "Batch worker started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(ack) = flush_rx.recv() => {
                    self.flush(false).await;
                    let _ = ack.send(());
                }
                _ = self.queue.wake.notified() => self.flush(true).await,
                _ = ticker.tick() => self.flush(false).await,
            }
        }

        self.flush(false).await;
        // Flush requests that raced with shutdown are satisfied by the drain.
        flush_rx.close();
        while let Ok(ack) = flush_rx.try_recv() {
            let _ = ack.send(());
        }
        debug!(signal = %kind, "Batch worker stopped");
    }

    /// Dispatch buffered records one batch at a time, oldest first.
    async fn flush(&self, full_only: bool) {
        while let Some(records) = self.queue.take_batch(full_only) {
            let batch = Batch::new(self.queue.kind(), self.resource.clone(), records);
            self.dispatcher.dispatch(batch).await;
        }
    }
}
