use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::MiniMarketStatsAck;

/// Pipeline counters, readable while the pipeline runs
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub ticks_received: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub ticks_dropped_busy: AtomicU64,
    pub no_ops: AtomicU64,
    pub trades_dispatched: AtomicU64,
    pub trades_completed: AtomicU64,
    pub trades_failed: AtomicU64,
    pub acks_sent: AtomicU64,
    pub acks_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_received: u64,
    pub ticks_skipped: u64,
    pub ticks_dropped_busy: u64,
    pub no_ops: u64,
    pub trades_dispatched: u64,
    pub trades_completed: u64,
    pub trades_failed: u64,
    pub acks_sent: u64,
    pub acks_dropped: u64,
}

impl PipelineMetrics {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks_received: get(&self.ticks_received),
            ticks_skipped: get(&self.ticks_skipped),
            ticks_dropped_busy: get(&self.ticks_dropped_busy),
            no_ops: get(&self.no_ops),
            trades_dispatched: get(&self.trades_dispatched),
            trades_completed: get(&self.trades_completed),
            trades_failed: get(&self.trades_failed),
            acks_sent: get(&self.acks_sent),
            acks_dropped: get(&self.acks_dropped),
        }
    }
}

/// Non-blocking sender of flow-control acknowledgements.
///
/// Never waits: when the channel is full the ack is dropped and counted.
#[derive(Clone)]
pub struct AckSender {
    tx: mpsc::Sender<MiniMarketStatsAck>,
    metrics: Arc<PipelineMetrics>,
}

impl AckSender {
    pub fn new(tx: mpsc::Sender<MiniMarketStatsAck>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { tx, metrics }
    }

    /// Acknowledge `count` handled ticks
    pub fn ack(&self, count: usize) {
        if count == 0 {
            return;
        }
        match self.tx.try_send(MiniMarketStatsAck { count }) {
            Ok(()) => PipelineMetrics::add(&self.metrics.acks_sent, 1),
            Err(TrySendError::Full(_)) => {
                PipelineMetrics::add(&self.metrics.acks_dropped, 1);
                tracing::warn!(
                    count,
                    capacity = self.tx.max_capacity(),
                    "Ack channel full, dropping acknowledgement"
                );
            }
            // live gateways do not pace on acks
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(count, "No ack consumer");
            }
        }
    }
}
