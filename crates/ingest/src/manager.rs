//! The ingestion manager.
//!
//! Owns source registration, the per-adapter supervisor tasks, the single
//! bounded fan-in queue, duplicate suppression, and cursor persistence.
//! One explicit instance is created and injected wherever it is needed;
//! nothing here is global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use inflow_core::{IngestConfig, IngestionEvent, SourceState, SupervisorConfig};
use inflow_normalize::{Normalizer, NormalizerOptions};
use inflow_sources::{
    AdapterContext, AdapterStats, AdapterStatsSnapshot, CursorCell, EventSink, SourceAdapter,
};

use crate::cursor_store::CursorStore;
use crate::dedup::DedupCache;
use crate::error::IngestError;
use crate::supervisor::Supervisor;

/// Downstream stage the pipeline hands deduplicated events to. In the
/// server this is the dispatch engine; tests plug in recorders.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, event: IngestionEvent);
}

/// Counters for the fan-in pipeline itself.
#[derive(Debug, Default)]
pub struct ManagerStats {
    pub events_in: AtomicU64,
    pub deduped: AtomicU64,
    pub dispatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ManagerStatsSnapshot {
    pub events_in: u64,
    pub deduped: u64,
    pub dispatched: u64,
}

impl ManagerStats {
    pub fn snapshot(&self) -> ManagerStatsSnapshot {
        ManagerStatsSnapshot {
            events_in: self.events_in.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}

struct RegisteredSource {
    adapter: Arc<dyn SourceAdapter>,
    ctx: AdapterContext,
    stats: Arc<AdapterStats>,
    state: Arc<RwLock<SourceState>>,
}

pub struct IngestionManager {
    ingest: IngestConfig,
    supervisor: SupervisorConfig,
    tx: mpsc::Sender<IngestionEvent>,
    rx: Mutex<Option<mpsc::Receiver<IngestionEvent>>>,
    cancel_tx: watch::Sender<bool>,
    sources: Mutex<HashMap<String, RegisteredSource>>,
    cursor_store: CursorStore,
    persisted_cursors: HashMap<String, String>,
    stats: Arc<ManagerStats>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionManager {
    pub fn new(ingest: IngestConfig, supervisor: SupervisorConfig) -> Result<Self, IngestError> {
        let cursor_store = CursorStore::new(&ingest.data_dir)?;
        let persisted_cursors = cursor_store.load().unwrap_or_else(|e| {
            warn!(error = %e, "cursor store unreadable, starting without cursors");
            HashMap::new()
        });

        let (tx, rx) = mpsc::channel(ingest.queue_capacity);
        let (cancel_tx, _) = watch::channel(false);

        Ok(Self {
            ingest,
            supervisor,
            tx,
            rx: Mutex::new(Some(rx)),
            cancel_tx,
            sources: Mutex::new(HashMap::new()),
            cursor_store,
            persisted_cursors,
            stats: Arc::new(ManagerStats::default()),
            tasks: Mutex::new(Vec::new()),
            pipeline: Mutex::new(None),
        })
    }

    /// Register an adapter before `start_all`. Fails synchronously on a
    /// duplicate id; adapter config validation happens in the adapter's
    /// own `start`.
    pub fn register_source(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        options: NormalizerOptions,
    ) -> Result<String, IngestError> {
        let id = adapter.adapter_id().to_string();
        let mut sources = self.sources.lock().expect("sources lock poisoned");
        if sources.contains_key(&id) {
            return Err(IngestError::DuplicateSource(id));
        }

        let stats = Arc::new(AdapterStats::default());
        let sink = EventSink::new(
            id.clone(),
            self.tx.clone(),
            Arc::new(Normalizer::new(options)),
            self.ingest.max_enqueue_wait(),
            stats.clone(),
        );
        let ctx = AdapterContext {
            sink,
            cancel: self.cancel_tx.subscribe(),
            cursor: CursorCell::new(self.persisted_cursors.get(&id).cloned()),
        };
        let state = Arc::new(RwLock::new(SourceState::new(
            id.clone(),
            adapter.source_type(),
        )));

        info!(adapter_id = %id, source_type = %adapter.source_type(), "source registered");
        sources.insert(
            id.clone(),
            RegisteredSource {
                adapter,
                ctx,
                stats,
                state,
            },
        );
        Ok(id)
    }

    /// Spawn the pipeline consumer and one supervisor task per source.
    pub fn start_all(&self, consumer: Arc<dyn EventConsumer>) -> Result<(), IngestError> {
        let rx = self
            .rx
            .lock()
            .expect("rx lock poisoned")
            .take()
            .ok_or(IngestError::AlreadyStarted)?;

        let dedup = DedupCache::new(self.ingest.dedup_max_entries, self.ingest.dedup_window());
        let pipeline = tokio::spawn(pipeline(
            rx,
            self.cancel_tx.subscribe(),
            dedup,
            consumer,
            self.stats.clone(),
        ));
        *self.pipeline.lock().expect("pipeline lock poisoned") = Some(pipeline);

        let sources = self.sources.lock().expect("sources lock poisoned");
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        for (id, source) in sources.iter() {
            let supervisor = Supervisor {
                adapter: source.adapter.clone(),
                ctx: source.ctx.clone(),
                state: source.state.clone(),
                config: self.supervisor.clone(),
            };
            tasks.push((id.clone(), tokio::spawn(supervisor.run())));
        }
        info!(sources = sources.len(), "ingestion started");
        Ok(())
    }

    /// Signal shutdown, wait up to `grace` for adapters to flush and exit,
    /// then abort stragglers. Returns the ids that had to be force-killed.
    pub async fn stop_all(&self, grace: Duration) -> Vec<String> {
        let _ = self.cancel_tx.send(true);

        let deadline = tokio::time::Instant::now() + grace;
        let tasks: Vec<_> =
            std::mem::take(&mut *self.tasks.lock().expect("tasks lock poisoned"));
        let mut force_killed = Vec::new();

        for (id, mut handle) in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!(adapter_id = %id, "did not stop within grace, aborting");
                handle.abort();
                force_killed.push(id);
            }
        }

        // The pipeline drains the queue after the cancel signal; give it a
        // moment before aborting.
        let pipeline = self.pipeline.lock().expect("pipeline lock poisoned").take();
        if let Some(mut handle) = pipeline {
            let wait = deadline
                .saturating_duration_since(tokio::time::Instant::now())
                .max(Duration::from_millis(250));
            if tokio::time::timeout(wait, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        if let Err(e) = self.persist_cursors() {
            warn!(error = %e, "failed to persist cursors on shutdown");
        }
        info!(force_killed = force_killed.len(), "ingestion stopped");
        force_killed
    }

    /// Write every source's current resume token to the cursor store.
    pub fn persist_cursors(&self) -> Result<(), IngestError> {
        let sources = self.sources.lock().expect("sources lock poisoned");
        let cursors: HashMap<String, String> = sources
            .iter()
            .filter_map(|(id, s)| s.ctx.cursor.load().map(|c| (id.clone(), c)))
            .collect();
        self.cursor_store.save(&cursors)
    }

    /// Health snapshot per registered adapter, with the live cursor.
    pub fn health(&self) -> HashMap<String, SourceState> {
        let sources = self.sources.lock().expect("sources lock poisoned");
        sources
            .iter()
            .map(|(id, source)| {
                let mut state = source.state.read().expect("state lock poisoned").clone();
                state.cursor = source.ctx.cursor.load();
                (id.clone(), state)
            })
            .collect()
    }

    pub fn stats(&self) -> ManagerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn adapter_stats(&self) -> HashMap<String, AdapterStatsSnapshot> {
        let sources = self.sources.lock().expect("sources lock poisoned");
        sources
            .iter()
            .map(|(id, source)| (id.clone(), source.stats.snapshot()))
            .collect()
    }
}

/// Single consumer of the fan-in queue: dedup, then hand off. Runs until
/// cancelled, then drains whatever the adapters enqueued before stopping.
async fn pipeline(
    mut rx: mpsc::Receiver<IngestionEvent>,
    mut cancel: watch::Receiver<bool>,
    mut dedup: DedupCache,
    consumer: Arc<dyn EventConsumer>,
    stats: Arc<ManagerStats>,
) {
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => handle_one(event, &mut dedup, &consumer, &stats).await,
                    None => return,
                }
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        handle_one(event, &mut dedup, &consumer, &stats).await;
    }
}

async fn handle_one(
    event: IngestionEvent,
    dedup: &mut DedupCache,
    consumer: &Arc<dyn EventConsumer>,
    stats: &ManagerStats,
) {
    stats.events_in.fetch_add(1, Ordering::Relaxed);

    if let Some(key) = event.dedup_key.clone() {
        if !dedup.check_and_insert(&key, Utc::now()) {
            stats.deduped.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_id = %event.event_id,
                source_id = %event.source_id,
                dedup_key = %key,
                "duplicate suppressed"
            );
            return;
        }
    }

    stats.dispatched.fetch_add(1, Ordering::Relaxed);
    consumer.consume(event).await;
}
