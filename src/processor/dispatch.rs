//! Routes a finished batch to the collector or the fallback sink.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::debug;

use super::rate_limited::RateLimitedLogger;
use crate::config::{FallbackMode, TransportConfig};
use crate::error::{ErrorClass, ExportError};
use crate::exporters::Transport;
use crate::health::HealthMonitor;
use crate::record::Batch;
use crate::retry::RetryController;
use crate::stats::PipelineStats;

/// The collector transport together with the settings it was built from.
///
/// Swapped as a unit on reconfiguration; a send that already loaded it runs
/// to completion against the old instance.
pub(crate) struct ActiveTransport {
    pub(crate) config: TransportConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: RetryController,
}

impl ActiveTransport {
    pub(crate) fn new(config: TransportConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            retry: RetryController::from_config(&config),
            config,
            transport,
        }
    }
}

pub(crate) struct Dispatcher {
    active: Arc<ArcSwap<ActiveTransport>>,
    fallback: Arc<dyn Transport>,
    fallback_mode: FallbackMode,
    health: Arc<HealthMonitor>,
    stats: Arc<PipelineStats>,
    rejected_log: RateLimitedLogger,
}

impl Dispatcher {
    pub(crate) fn new(
        active: Arc<ArcSwap<ActiveTransport>>,
        fallback: Arc<dyn Transport>,
        fallback_mode: FallbackMode,
        health: Arc<HealthMonitor>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            active,
            fallback,
            fallback_mode,
            health,
            stats,
            rejected_log: RateLimitedLogger::default(),
        }
    }

    /// Deliver one batch. Never returns an error: every outcome ends in the
    /// stats.
    pub(crate) async fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        if self.health.is_healthy() {
            let active = self.active.load_full();
            match active.retry.send(active.transport.as_ref(), &batch).await {
                Ok(()) => {
                    self.stats.record_exported(batch.len());
                    return;
                }
                Err(ExportError::Fatal(reason)) => {
                    self.stats.record_error(ErrorClass::Fatal);
                    self.stats.record_discarded();
                    self.rejected_log
                        .warn("Collector rejected batch, discarding", &reason);
                    return;
                }
                Err(err) => {
                    self.health.mark_degraded(&active, &err);
                }
            }
        }

        self.divert(&batch).await;
    }

    async fn divert(&self, batch: &Batch) {
        match self.fallback_mode {
            FallbackMode::LocalLog => match self.fallback.send(batch).await {
                Ok(()) => self.stats.record_fallback(),
                Err(err) => {
                    self.stats.record_discarded();
                    debug!(
                        sink = self.fallback.name(),
                        signal = %batch.kind(),
                        error = %err,
                        "Fallback sink failed, batch dropped"
                    );
                }
            },
            FallbackMode::Disabled => {
                self.stats.record_discarded();
                debug!(
                    signal = %batch.kind(),
                    records = batch.len(),
                    "Collector degraded and fallback disabled, batch dropped"
                );
            }
        }
    }
}
