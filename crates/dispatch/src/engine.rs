//! Event-to-handler dispatch.
//!
//! Matching, permission gating, and cooldown decisions all happen inline
//! on the caller's task. The engine is driven by the ingestion pipeline's
//! single consumer, so these decisions are naturally serialized and the
//! cooldown map sees a consistent order of events. Handler bodies are the
//! only concurrent part: each invocation runs on its own task behind a
//! semaphore sized by `handler_concurrency`, so one slow handler cannot
//! stall matching but total handler parallelism stays bounded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use inflow_core::IngestionEvent;

use crate::binding::{Binding, FanPolicy};
use crate::cooldown::CooldownMap;
use crate::registry::BindingRegistry;

/// Engine counters, exposed via the stats API.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub events: AtomicU64,
    pub unmatched: AtomicU64,
    pub invoked: AtomicU64,
    pub permission_skipped: AtomicU64,
    pub throttled: AtomicU64,
    pub handler_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchStatsSnapshot {
    pub events: u64,
    pub unmatched: u64,
    pub invoked: u64,
    pub permission_skipped: u64,
    pub throttled: u64,
    pub handler_errors: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            invoked: self.invoked.load(Ordering::Relaxed),
            permission_skipped: self.permission_skipped.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct DispatchEngine {
    registry: Arc<BindingRegistry>,
    cooldowns: Mutex<CooldownMap>,
    stats: Arc<DispatchStats>,
    permits: Arc<Semaphore>,
}

impl DispatchEngine {
    pub fn new(registry: Arc<BindingRegistry>, handler_concurrency: usize) -> Self {
        Self {
            registry,
            cooldowns: Mutex::new(CooldownMap::new()),
            stats: Arc::new(DispatchStats::default()),
            permits: Arc::new(Semaphore::new(handler_concurrency.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one event. Returns the number of handler invocations started.
    pub async fn dispatch(&self, event: IngestionEvent) -> usize {
        self.stats.events.fetch_add(1, Ordering::Relaxed);

        let candidates = self.registry.candidates_for(event.source_type);
        let matching: Vec<Arc<Binding>> = candidates
            .into_iter()
            .filter(|b| b.mask.matches(&event.route))
            .collect();
        if matching.is_empty() {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.event_id, route = %event.route, "no binding matched");
            return 0;
        }

        let selected = select_by_fan_policy(&matching);
        let event = Arc::new(event);
        let now = Utc::now();
        let mut fired = 0;

        for binding in selected {
            if event.origin_level < binding.required_level {
                self.stats.permission_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    binding_id = %binding.id,
                    origin = %event.origin,
                    origin_level = event.origin_level,
                    required_level = binding.required_level,
                    "origin below required level, skipping"
                );
                continue;
            }

            let allowed = self
                .cooldowns
                .lock()
                .expect("cooldown lock poisoned")
                .check_and_stamp(binding.id, &event.origin, binding.cooldown, now);
            if !allowed {
                self.stats.throttled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    binding_id = %binding.id,
                    origin = %event.origin,
                    "cooldown active, throttled"
                );
                continue;
            }

            self.stats.invoked.fetch_add(1, Ordering::Relaxed);
            fired += 1;

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("handler semaphore closed");
            let handler = binding.handler.clone();
            let stats = self.stats.clone();
            let event = event.clone();
            let binding_id = binding.id;
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handler.handle(&event).await {
                    stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        binding_id = %binding_id,
                        event_id = %event.event_id,
                        route = %event.route,
                        error = %e,
                        "handler failed"
                    );
                }
            });
        }

        fired
    }
}

/// Apply fan policies to the ordered match list: every FanOut binding
/// fires; of the FirstMatchOnly bindings, only the most specific one does
/// (literal beats wildcard, ties by registration order).
fn select_by_fan_policy(matching: &[Arc<Binding>]) -> Vec<Arc<Binding>> {
    let mut selected: Vec<Arc<Binding>> = matching
        .iter()
        .filter(|b| b.fan_policy == FanPolicy::FanOut)
        .cloned()
        .collect();

    let exclusive: Vec<&Arc<Binding>> = matching
        .iter()
        .filter(|b| b.fan_policy == FanPolicy::FirstMatchOnly)
        .collect();
    if let Some(winner) = exclusive
        .iter()
        .find(|b| b.mask.is_literal())
        .or_else(|| exclusive.first())
    {
        selected.push((*winner).clone());
    }

    selected.sort_by_key(|b| b.seq);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use inflow_core::{Payload, SourceType};

    use crate::binding::BindingScope;
    use crate::handler::{Handler, HandlerError};

    #[derive(Default)]
    struct Recorder {
        label: String,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn named(label: &str) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }
        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        fn name(&self) -> &str {
            &self.label
        }
        async fn handle(&self, event: &IngestionEvent) -> Result<(), HandlerError> {
            self.calls.lock().unwrap().push(event.route.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn handle(&self, _event: &IngestionEvent) -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    fn event(route: &str, origin: &str, level: i64) -> IngestionEvent {
        IngestionEvent::new("src", SourceType::Webhook, route, Payload::new())
            .with_origin(origin, level)
    }

    async fn settle() {
        // Handlers run on spawned tasks; yield until they finish.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn engine() -> (DispatchEngine, Arc<BindingRegistry>) {
        let registry = Arc::new(BindingRegistry::new());
        (DispatchEngine::new(registry.clone(), 1), registry)
    }

    #[tokio::test]
    async fn below_required_level_is_skipped_not_an_error() {
        let (engine, registry) = engine();
        let handler = Recorder::named("admin-only");
        registry
            .register(
                BindingScope::Any,
                "*",
                50,
                Duration::ZERO,
                FanPolicy::FanOut,
                handler.clone(),
            )
            .unwrap();

        assert_eq!(engine.dispatch(event("x", "alice", 10)).await, 0);
        assert_eq!(engine.dispatch(event("x", "root", 99)).await, 1);
        settle().await;

        assert_eq!(handler.count(), 1);
        let stats = engine.stats();
        assert_eq!(stats.permission_skipped, 1);
        assert_eq!(stats.invoked, 1);
        assert_eq!(stats.handler_errors, 0);
    }

    #[tokio::test]
    async fn cooldown_throttles_per_origin() {
        let (engine, registry) = engine();
        let handler = Recorder::named("throttled");
        registry
            .register(
                BindingScope::Any,
                "*",
                0,
                Duration::from_secs(60),
                FanPolicy::FanOut,
                handler.clone(),
            )
            .unwrap();

        assert_eq!(engine.dispatch(event("x", "alice", 0)).await, 1);
        assert_eq!(engine.dispatch(event("x", "alice", 0)).await, 0);
        // Another origin is unaffected.
        assert_eq!(engine.dispatch(event("x", "bob", 0)).await, 1);
        settle().await;

        assert_eq!(handler.count(), 2);
        assert_eq!(engine.stats().throttled, 1);
    }

    #[tokio::test]
    async fn fan_out_fires_every_match() {
        let (engine, registry) = engine();
        let first = Recorder::named("first");
        let second = Recorder::named("second");
        for handler in [first.clone(), second.clone()] {
            registry
                .register(
                    BindingScope::Any,
                    "github/*",
                    0,
                    Duration::ZERO,
                    FanPolicy::FanOut,
                    handler,
                )
                .unwrap();
        }

        assert_eq!(engine.dispatch(event("github/push", "o", 0)).await, 2);
        settle().await;
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[tokio::test]
    async fn first_match_only_prefers_exact_literal() {
        let (engine, registry) = engine();
        let wildcard = Recorder::named("wildcard");
        let literal = Recorder::named("literal");
        registry
            .register(
                BindingScope::Any,
                "github/*",
                0,
                Duration::ZERO,
                FanPolicy::FirstMatchOnly,
                wildcard.clone(),
            )
            .unwrap();
        registry
            .register(
                BindingScope::Any,
                "github/push",
                0,
                Duration::ZERO,
                FanPolicy::FirstMatchOnly,
                literal.clone(),
            )
            .unwrap();

        // Registered later, but exact literal beats the wildcard.
        assert_eq!(engine.dispatch(event("github/push", "o", 0)).await, 1);
        settle().await;
        assert_eq!(literal.count(), 1);
        assert_eq!(wildcard.count(), 0);

        // No literal candidate: earliest registration wins.
        assert_eq!(engine.dispatch(event("github/fork", "o", 0)).await, 1);
        settle().await;
        assert_eq!(wildcard.count(), 1);
    }

    #[tokio::test]
    async fn scope_filters_before_matching() {
        let (engine, registry) = engine();
        let metric_only = Recorder::named("metric-only");
        registry
            .register(
                BindingScope::Source(SourceType::Metric),
                "*",
                0,
                Duration::ZERO,
                FanPolicy::FanOut,
                metric_only.clone(),
            )
            .unwrap();

        assert_eq!(engine.dispatch(event("anything", "o", 0)).await, 0);
        assert_eq!(engine.stats().unmatched, 1);
        assert_eq!(metric_only.count(), 0);
    }

    #[tokio::test]
    async fn handler_errors_are_contained() {
        let (engine, registry) = engine();
        let survivor = Recorder::named("survivor");
        registry
            .register(
                BindingScope::Any,
                "*",
                0,
                Duration::ZERO,
                FanPolicy::FanOut,
                Arc::new(Failing),
            )
            .unwrap();
        registry
            .register(
                BindingScope::Any,
                "*",
                0,
                Duration::ZERO,
                FanPolicy::FanOut,
                survivor.clone(),
            )
            .unwrap();

        assert_eq!(engine.dispatch(event("x", "o", 0)).await, 2);
        settle().await;

        assert_eq!(survivor.count(), 1);
        assert_eq!(engine.stats().handler_errors, 1);
    }
}
