//! Collector health tracking and recovery probing.
//!
//! The state is one atomic byte. Every transition is a single
//! compare-and-swap, so flush tasks reading it never observe a half-applied
//! change: a flush that already picked its sink finishes against that sink,
//! the next flush reads the new state.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::processor::ActiveTransport;
use crate::stats::PipelineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Batches go through the retry controller to the collector.
    Healthy,
    /// Batches go to the fallback sink (or are dropped).
    Degraded,
    /// A recovery probe is in flight; batches still bypass the collector.
    Probing,
}

impl HealthState {
    fn as_u8(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Probing => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => HealthState::Healthy,
            1 => HealthState::Degraded,
            _ => HealthState::Probing,
        }
    }
}

pub struct HealthMonitor {
    state: AtomicU8,
    active: Arc<ArcSwap<ActiveTransport>>,
    stats: Arc<PipelineStats>,
    probe_interval: Duration,
}

impl HealthMonitor {
    pub(crate) fn new(
        active: Arc<ArcSwap<ActiveTransport>>,
        stats: Arc<PipelineStats>,
        probe_interval: Duration,
    ) -> Self {
        Self {
            state: AtomicU8::new(HealthState::Healthy.as_u8()),
            active,
            stats,
            probe_interval,
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    fn transition(&self, from: HealthState, to: HealthState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Healthy -> Degraded after `failed` gave up on a batch. Returns whether
    /// this call made the transition; only that caller logs.
    ///
    /// A failure from a transport that was swapped out in the meantime leaves
    /// the state alone: the replacement has not failed yet.
    pub(crate) fn mark_degraded(
        &self,
        failed: &Arc<ActiveTransport>,
        error: &ExportError,
    ) -> bool {
        self.stats.record_error(error.class());
        let active = self.active.load();
        if !Arc::ptr_eq(failed, &*active) {
            debug!(
                endpoint = %failed.config.endpoint,
                error = %error,
                "Ignoring failure from a replaced transport"
            );
            return false;
        }
        if !self.transition(HealthState::Healthy, HealthState::Degraded) {
            return false;
        }

        warn!(
            endpoint = %active.config.endpoint,
            protocol = active.config.protocol.as_str(),
            error = %error,
            probe_interval_ms = self.probe_interval.as_millis() as u64,
            "Collector unreachable, switching to fallback sink"
        );
        true
    }

    /// Force Healthy, e.g. after the transport was replaced.
    pub fn reset(&self) {
        self.state.store(HealthState::Healthy.as_u8(), Ordering::Release);
    }

    /// Probing -> Degraded for a probe that was cancelled mid-flight.
    pub(crate) fn abandon_probe(&self) {
        self.transition(HealthState::Probing, HealthState::Degraded);
    }

    /// Run one recovery probe if degraded.
    ///
    /// Returns `None` when there was nothing to do: the pipeline is healthy
    /// or another probe is already in flight.
    pub async fn probe_once(&self) -> Option<HealthState> {
        if !self.transition(HealthState::Degraded, HealthState::Probing) {
            return None;
        }

        let active = self.active.load_full();
        let probe = tokio::time::timeout(active.config.timeout, active.transport.probe());
        let outcome = match probe.await {
            Ok(result) => result,
            Err(_) => Err(ExportError::RetryableNetwork("probe timed out".to_string())),
        };

        match outcome {
            Ok(()) => {
                if self.transition(HealthState::Probing, HealthState::Healthy) {
                    info!(
                        endpoint = %active.config.endpoint,
                        protocol = active.config.protocol.as_str(),
                        "Collector reachable again, resuming export"
                    );
                }
            }
            Err(err) => {
                self.stats.record_error(err.class());
                debug!(endpoint = %active.config.endpoint, error = %err, "Health probe failed");
                self.transition(HealthState::Probing, HealthState::Degraded);
            }
        }

        Some(self.state())
    }

    /// Probe loop. Ticks that fire while a probe is running are skipped.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(state) = self.probe_once().await {
                        debug!(state = ?state, "Health probe finished");
                    }
                }
            }
        }
        debug!("Health monitor stopped");
    }
}
