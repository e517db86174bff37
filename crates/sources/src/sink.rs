//! The bounded entry point adapters push events through.
//!
//! Every adapter shares one fan-in mpsc channel owned by the manager. The
//! sink applies backpressure with a deadline: when the queue stays full past
//! `max_wait`, the event is dropped and counted rather than blocking the
//! adapter forever or vanishing silently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use inflow_core::IngestionEvent;
use inflow_normalize::{NormalizeError, Normalizer, RawEvent};

/// Per-adapter counters, shared with the manager for health reporting.
#[derive(Debug, Default)]
pub struct AdapterStats {
    pub events_emitted: AtomicU64,
    pub normalize_failures: AtomicU64,
    pub overflow_drops: AtomicU64,
    pub poll_errors: AtomicU64,
}

/// Point-in-time copy of [`AdapterStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdapterStatsSnapshot {
    pub events_emitted: u64,
    pub normalize_failures: u64,
    pub overflow_drops: u64,
    pub poll_errors: u64,
}

impl AdapterStats {
    pub fn snapshot(&self) -> AdapterStatsSnapshot {
        AdapterStatsSnapshot {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            normalize_failures: self.normalize_failures.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

/// One adapter's handle on the shared fan-in queue.
#[derive(Clone)]
pub struct EventSink {
    source_id: String,
    tx: mpsc::Sender<IngestionEvent>,
    normalizer: Arc<Normalizer>,
    max_wait: Duration,
    stats: Arc<AdapterStats>,
}

impl EventSink {
    pub fn new(
        source_id: impl Into<String>,
        tx: mpsc::Sender<IngestionEvent>,
        normalizer: Arc<Normalizer>,
        max_wait: Duration,
        stats: Arc<AdapterStats>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            tx,
            normalizer,
            max_wait,
            stats,
        }
    }

    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Normalize a raw payload and enqueue the resulting events.
    ///
    /// Returns how many events were enqueued. A decode failure is counted
    /// and surfaced to the caller so adapters with a reply channel (the
    /// webhook receiver) can report it upstream; polling adapters log and
    /// move on.
    pub async fn submit_raw(&self, raw: RawEvent) -> Result<usize, NormalizeError> {
        let events = match self.normalizer.normalize(raw) {
            Ok(events) => events,
            Err(e) => {
                self.stats.normalize_failures.fetch_add(1, Ordering::Relaxed);
                warn!(source_id = %self.source_id, error = %e, "failed to normalize payload");
                return Err(e);
            }
        };

        let mut enqueued = 0;
        for event in events {
            if self.send(event).await {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Enqueue one already-normalized event. Returns `false` if the queue
    /// stayed full past the deadline and the event was dropped.
    pub async fn send(&self, event: IngestionEvent) -> bool {
        match self.tx.send_timeout(event, self.max_wait).await {
            Ok(()) => {
                self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::SendTimeoutError::Timeout(event)) => {
                self.stats.overflow_drops.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source_id = %self.source_id,
                    event_id = %event.event_id,
                    route = %event.route,
                    "ingest queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                // Manager is shutting down; nothing downstream to count for.
                false
            }
        }
    }

    /// Record a transient poll failure for health reporting.
    pub fn record_poll_error(&self) {
        self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
    }
}
