//! Per-kind record buffer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use crate::record::{Record, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Accepted,
    /// Accepted after evicting the oldest buffered record.
    Overflowed,
    /// The queue is closed; the record was discarded.
    Closed,
}

#[derive(Debug)]
struct Buffer {
    records: VecDeque<Record>,
    closed: bool,
}

/// Bounded FIFO of records of one kind.
///
/// The lock is held only to append or to split off a batch, never across an
/// `.await`, so producers are never blocked by an in-flight send.
#[derive(Debug)]
pub(crate) struct KindQueue {
    kind: RecordKind,
    buffer: Mutex<Buffer>,
    max_batch_size: usize,
    hard_cap: usize,
    /// Signalled when a full batch is available.
    pub(crate) wake: Notify,
}

impl KindQueue {
    pub(crate) fn new(kind: RecordKind, max_batch_size: usize, hard_cap: usize) -> Self {
        Self {
            kind,
            buffer: Mutex::new(Buffer {
                records: VecDeque::with_capacity(max_batch_size),
                closed: false,
            }),
            max_batch_size,
            hard_cap,
            wake: Notify::new(),
        }
    }

    pub(crate) fn kind(&self) -> RecordKind {
        self.kind
    }

    pub(crate) fn push(&self, record: Record) -> Push {
        let (len, outcome) = {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return Push::Closed;
            }
            let outcome = if buffer.records.len() >= self.hard_cap {
                buffer.records.pop_front();
                Push::Overflowed
            } else {
                Push::Accepted
            };
            buffer.records.push_back(record);
            (buffer.records.len(), outcome)
        };

        if len >= self.max_batch_size {
            self.wake.notify_one();
        }
        outcome
    }

    /// Split the oldest records off into a batch-sized chunk.
    ///
    /// With `full_only`, returns `None` unless a full batch is buffered.
    pub(crate) fn take_batch(&self, full_only: bool) -> Option<Vec<Record>> {
        let mut buffer = self.buffer.lock();
        let len = buffer.records.len();
        if len == 0 || (full_only && len < self.max_batch_size) {
            return None;
        }
        let count = len.min(self.max_batch_size);
        Some(buffer.records.drain(..count).collect())
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.lock().records.len()
    }

    /// Reject further pushes. Buffered records stay for the final drain.
    pub(crate) fn close(&self) {
        self.buffer.lock().closed = true;
    }
}
