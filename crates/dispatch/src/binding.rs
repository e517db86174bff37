//! Binding descriptors: what the registry stores per registration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use inflow_core::SourceType;

use crate::handler::Handler;
use crate::mask::Mask;

pub type BindingId = Uuid;

/// Which events a binding sees before mask matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingScope {
    Any,
    Source(SourceType),
}

impl BindingScope {
    pub fn covers(&self, source_type: SourceType) -> bool {
        match self {
            Self::Any => true,
            Self::Source(scoped) => *scoped == source_type,
        }
    }
}

impl std::fmt::Display for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Source(source_type) => f.write_str(source_type.as_str()),
        }
    }
}

/// What happens when several bindings match one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanPolicy {
    /// Every matching binding fires.
    #[default]
    FanOut,
    /// Among first-match-only candidates, only the most specific fires:
    /// an exact literal pattern beats any wildcard, ties break by
    /// registration order.
    FirstMatchOnly,
}

/// One registered binding. Compiled at registration, immutable after.
pub struct Binding {
    pub id: BindingId,
    pub scope: BindingScope,
    pub mask: Mask,
    /// Minimum `origin_level` an event needs to trigger this binding.
    pub required_level: i64,
    /// Per-origin minimum spacing between invocations. Zero disables
    /// throttling.
    pub cooldown: Duration,
    pub fan_policy: FanPolicy,
    pub handler: Arc<dyn Handler>,
    /// Registration sequence number; lower fired first and wins ties.
    pub(crate) seq: u64,
}

/// Serializable summary for listings and the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub id: BindingId,
    pub scope: String,
    pub pattern: String,
    pub required_level: i64,
    pub cooldown_secs: u64,
    pub fan_policy: FanPolicy,
    pub handler: String,
}

impl Binding {
    pub fn info(&self) -> BindingInfo {
        BindingInfo {
            id: self.id,
            scope: self.scope.to_string(),
            pattern: self.mask.pattern().to_string(),
            required_level: self.required_level,
            cooldown_secs: self.cooldown.as_secs(),
            fan_policy: self.fan_policy,
            handler: self.handler.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_coverage() {
        assert!(BindingScope::Any.covers(SourceType::Webhook));
        assert!(BindingScope::Source(SourceType::Webhook).covers(SourceType::Webhook));
        assert!(!BindingScope::Source(SourceType::Metric).covers(SourceType::Webhook));
    }

    #[test]
    fn fan_policy_serde() {
        let policy: FanPolicy = serde_json::from_str(r#""first_match_only""#).unwrap();
        assert_eq!(policy, FanPolicy::FirstMatchOnly);
        assert_eq!(FanPolicy::default(), FanPolicy::FanOut);
    }
}
