//! Canonical event record produced by every source adapter.
//!
//! All adapters, regardless of how they receive data, emit the same
//! [`IngestionEvent`] shape. The record is constructed once by the
//! normalizer and never mutated afterwards; dedup and cooldown decisions
//! key off `dedup_key` and `origin` respectively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque structured payload carried by an event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The kind of external system an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Webhook,
    PolledApi,
    FileWatch,
    Database,
    Stream,
    LogTail,
    Metric,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::PolledApi => "polled_api",
            Self::FileWatch => "file_watch",
            Self::Database => "database",
            Self::Stream => "stream",
            Self::LogTail => "log_tail",
            Self::Metric => "metric",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized event flowing from an adapter into the dispatch path.
///
/// Immutable after construction. `dedup_key` uniqueness is only enforced
/// within the manager's dedup window, not globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    /// Unique id assigned at normalization time.
    pub event_id: Uuid,
    /// Id of the adapter that produced the event.
    pub source_id: String,
    pub source_type: SourceType,
    pub received_at: DateTime<Utc>,
    /// Routing field binding masks are evaluated against: webhook path,
    /// broker topic, metric name, file path, and so on.
    pub route: String,
    pub payload: Payload,
    /// Suppresses duplicate delivery within the dedup window when present.
    pub dedup_key: Option<String>,
    /// Actor/entity that caused the event. Cooldowns and permission checks
    /// are keyed per origin.
    pub origin: String,
    /// Pre-computed permission level of the origin.
    pub origin_level: i64,
}

impl IngestionEvent {
    /// Construct an event with the default origin (`system`, level 0).
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        route: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source_id: source_id.into(),
            source_type,
            received_at: Utc::now(),
            route: route.into(),
            payload,
            dedup_key: None,
            origin: "system".to_string(),
            origin_level: 0,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>, level: i64) -> Self {
        self.origin = origin.into();
        self.origin_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_serde_snake_case() {
        let json = serde_json::to_string(&SourceType::PolledApi).unwrap();
        assert_eq!(json, r#""polled_api""#);
        let parsed: SourceType = serde_json::from_str(r#""log_tail""#).unwrap();
        assert_eq!(parsed, SourceType::LogTail);
    }

    #[test]
    fn event_builder_sets_fields() {
        let mut payload = Payload::new();
        payload.insert("n".to_string(), serde_json::json!(1));

        let event = IngestionEvent::new("src-1", SourceType::Webhook, "github/push", payload)
            .with_dedup_key("delivery-42")
            .with_origin("octocat", 30);

        assert_eq!(event.source_id, "src-1");
        assert_eq!(event.route, "github/push");
        assert_eq!(event.dedup_key.as_deref(), Some("delivery-42"));
        assert_eq!(event.origin, "octocat");
        assert_eq!(event.origin_level, 30);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = IngestionEvent::new("s", SourceType::Metric, "cpu.load", Payload::new());
        let json = serde_json::to_string(&event).unwrap();
        let back: IngestionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.source_type, SourceType::Metric);
        assert_eq!(back.route, "cpu.load");
    }
}
