//! Local fallback sink used while the collector is unreachable.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use super::Transport;
use crate::error::ExportError;
use crate::record::Batch;

/// Writes each record as one structured `info` event. Never fails.
#[derive(Debug, Default)]
pub struct FallbackSink {
    batches: AtomicU64,
    records: AtomicU64,
}

impl FallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches_written(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for FallbackSink {
    async fn send(&self, batch: &Batch) -> Result<(), ExportError> {
        let service = batch.resource().service_name();
        for record in batch.records() {
            match serde_json::to_string(record) {
                Ok(json) => info!(
                    service = %service,
                    signal = %batch.kind(),
                    record = %json,
                    "telemetry record"
                ),
                Err(e) => warn!(
                    error = %e,
                    name = %record.name(),
                    "Failed to render telemetry record"
                ),
            }
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local-log"
    }
}
