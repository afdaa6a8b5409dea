//! Mock transports shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ollystack_otel_pipeline::{Batch, Config, ExportError, FallbackMode, RecordKind, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Retryable,
    Fatal,
    Mismatch,
    /// Never completes.
    Stall,
}

/// Transport that records every batch it receives.
///
/// Counts a violation whenever a second send for the same kind starts while
/// one is still in flight.
pub struct MockTransport {
    behavior: Mutex<Behavior>,
    delay: Duration,
    batches: Mutex<Vec<(RecordKind, Vec<String>)>>,
    in_flight: [AtomicBool; 2],
    violations: AtomicU32,
    sends: AtomicU32,
    probes: AtomicU32,
    probe_failures_left: AtomicU32,
    stall_probes: AtomicBool,
}

impl MockTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            delay,
            batches: Mutex::new(Vec::new()),
            in_flight: [AtomicBool::new(false), AtomicBool::new(false)],
            violations: AtomicU32::new(0),
            sends: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            probe_failures_left: AtomicU32::new(0),
            stall_probes: AtomicBool::new(false),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn fail_probes(&self, count: u32) {
        self.probe_failures_left.store(count, Ordering::SeqCst);
    }

    /// Make every later probe hang until it is cancelled.
    pub fn stall_probes(&self) {
        self.stall_probes.store(true, Ordering::SeqCst);
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Names of the records of each accepted batch, in arrival order.
    pub fn batches(&self, kind: RecordKind) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, names)| names.clone())
            .collect()
    }

    pub fn names(&self, kind: RecordKind) -> Vec<String> {
        self.batches(kind).into_iter().flatten().collect()
    }

    fn slot(kind: RecordKind) -> usize {
        match kind {
            RecordKind::Span => 0,
            RecordKind::Metric => 1,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, batch: &Batch) -> Result<(), ExportError> {
        let slot = Self::slot(batch.kind());
        if self.in_flight[slot].swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.sends.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = *self.behavior.lock();
        let result = match behavior {
            Behavior::Succeed => {
                self.batches.lock().push((
                    batch.kind(),
                    batch.records().iter().map(|r| r.name().to_string()).collect(),
                ));
                Ok(())
            }
            Behavior::Retryable => Err(ExportError::RetryableNetwork("connection refused".into())),
            Behavior::Fatal => Err(ExportError::Fatal("HTTP 400: bad request".into())),
            Behavior::Mismatch => Err(ExportError::ProtocolMismatch("h2 protocol error".into())),
            Behavior::Stall => std::future::pending().await,
        };

        self.in_flight[slot].store(false, Ordering::SeqCst);
        result
    }

    async fn probe(&self) -> Result<(), ExportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.stall_probes.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let left = self.probe_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.probe_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ExportError::RetryableNetwork("connection refused".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Small batches, fast retries and a probe interval long enough to stay out
/// of the way unless a test shortens it.
pub fn test_config(max_batch_size: usize) -> Config {
    let mut config = Config::default();
    config.collector.endpoint = "http://collector.test:4318".to_string();
    config.collector.max_retries = 2;
    config.collector.base_delay_ms = 10;
    config.collector.max_delay_ms = 100;
    config.batch.max_batch_size = max_batch_size;
    config.batch.hard_cap = max_batch_size * 4;
    config.batch.max_batch_age_ms = 60_000;
    config.health.probe_interval_ms = 3_600_000;
    config.health.fallback = FallbackMode::LocalLog;
    config.resource.service_name = "fortune-api".to_string();
    config
}
