//! Binding storage and candidate lookup.
//!
//! Bindings are indexed by scope; candidate lookup for an event merges the
//! event's source-type bucket with the Any bucket, ordered by registration
//! sequence so fan-out order and tie-breaking stay deterministic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use inflow_core::SourceType;

use crate::binding::{Binding, BindingId, BindingInfo, BindingScope};
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::mask::Mask;

#[derive(Default)]
struct Index {
    by_scope: HashMap<BindingScope, Vec<Arc<Binding>>>,
    next_seq: u64,
}

#[derive(Default)]
pub struct BindingRegistry {
    index: RwLock<Index>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store a binding. An invalid pattern fails here,
    /// synchronously, before the binding ever sees an event.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        scope: BindingScope,
        pattern: &str,
        required_level: i64,
        cooldown: Duration,
        fan_policy: crate::binding::FanPolicy,
        handler: Arc<dyn Handler>,
    ) -> Result<BindingId, DispatchError> {
        let mask = Mask::compile(pattern)?;
        let id = Uuid::new_v4();

        let mut index = self.index.write().expect("registry lock poisoned");
        let seq = index.next_seq;
        index.next_seq += 1;

        let binding = Arc::new(Binding {
            id,
            scope,
            mask,
            required_level,
            cooldown,
            fan_policy,
            handler,
            seq,
        });
        info!(
            binding_id = %id,
            scope = %scope,
            pattern = %pattern,
            required_level,
            "binding registered"
        );
        index.by_scope.entry(scope).or_default().push(binding);
        Ok(id)
    }

    pub fn unregister(&self, id: BindingId) -> Result<(), DispatchError> {
        let mut index = self.index.write().expect("registry lock poisoned");
        for bucket in index.by_scope.values_mut() {
            if let Some(pos) = bucket.iter().position(|b| b.id == id) {
                bucket.remove(pos);
                info!(binding_id = %id, "binding unregistered");
                return Ok(());
            }
        }
        Err(DispatchError::UnknownBinding(id))
    }

    /// Bindings whose scope covers the source type, in registration order.
    /// Mask matching happens in the engine.
    pub fn candidates_for(&self, source_type: SourceType) -> Vec<Arc<Binding>> {
        let index = self.index.read().expect("registry lock poisoned");
        let mut candidates: Vec<Arc<Binding>> = Vec::new();
        for scope in [BindingScope::Source(source_type), BindingScope::Any] {
            if let Some(bucket) = index.by_scope.get(&scope) {
                candidates.extend(bucket.iter().cloned());
            }
        }
        candidates.sort_by_key(|b| b.seq);
        candidates
    }

    pub fn bindings(&self) -> Vec<BindingInfo> {
        let index = self.index.read().expect("registry lock poisoned");
        let mut all: Vec<&Arc<Binding>> = index.by_scope.values().flatten().collect();
        all.sort_by_key(|b| b.seq);
        all.iter().map(|b| b.info()).collect()
    }

    pub fn len(&self) -> usize {
        let index = self.index.read().expect("registry lock poisoned");
        index.by_scope.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::binding::FanPolicy;
    use crate::handler::HandlerError;
    use inflow_core::IngestionEvent;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn handle(&self, _event: &IngestionEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn register(
        registry: &BindingRegistry,
        scope: BindingScope,
        pattern: &str,
    ) -> BindingId {
        registry
            .register(
                scope,
                pattern,
                0,
                Duration::ZERO,
                FanPolicy::FanOut,
                Arc::new(Noop),
            )
            .unwrap()
    }

    #[test]
    fn invalid_pattern_fails_registration() {
        let registry = BindingRegistry::new();
        let result = registry.register(
            BindingScope::Any,
            "",
            0,
            Duration::ZERO,
            FanPolicy::FanOut,
            Arc::new(Noop),
        );
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn candidates_merge_scope_and_any_in_registration_order() {
        let registry = BindingRegistry::new();
        register(&registry, BindingScope::Source(SourceType::Webhook), "a/*");
        register(&registry, BindingScope::Any, "b/*");
        register(&registry, BindingScope::Source(SourceType::Metric), "c/*");
        register(&registry, BindingScope::Source(SourceType::Webhook), "d/*");

        let candidates = registry.candidates_for(SourceType::Webhook);
        let patterns: Vec<&str> = candidates.iter().map(|b| b.mask.pattern()).collect();
        assert_eq!(patterns, vec!["a/*", "b/*", "d/*"]);
    }

    #[test]
    fn unregister_removes_exactly_one() {
        let registry = BindingRegistry::new();
        let id = register(&registry, BindingScope::Any, "x/*");
        register(&registry, BindingScope::Any, "y/*");

        registry.unregister(id).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.unregister(id),
            Err(DispatchError::UnknownBinding(_))
        ));
    }

    #[test]
    fn listing_reflects_registration_order() {
        let registry = BindingRegistry::new();
        register(&registry, BindingScope::Any, "first");
        register(&registry, BindingScope::Source(SourceType::Stream), "second");

        let infos = registry.bindings();
        assert_eq!(infos[0].pattern, "first");
        assert_eq!(infos[1].pattern, "second");
        assert_eq!(infos[1].scope, "stream");
    }
}
