//! The pure mapping from raw adapter output to canonical events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use inflow_core::{IngestionEvent, SourceType};

use crate::error::NormalizeError;
use crate::format::{decode, lookup_path, sha256_hex, PayloadFormat};

/// What an adapter hands to the normalizer: raw bytes plus routing and
/// dedup metadata. Adapters that already know a provider-assigned identity
/// (delivery id, ETag, broker offset, row key) pass it as `dedup_hint`;
/// otherwise the normalizer falls back to a content hash.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub source_id: String,
    pub source_type: SourceType,
    pub route: String,
    pub format: PayloadFormat,
    pub bytes: Vec<u8>,
    pub dedup_hint: Option<String>,
}

/// Origin extraction settings, configured per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerOptions {
    /// Dot-path into the payload naming the actor that caused the event.
    #[serde(default)]
    pub origin_field: Option<String>,
    /// Dot-path into the payload holding the origin's permission level.
    #[serde(default)]
    pub level_field: Option<String>,
    #[serde(default = "default_origin")]
    pub default_origin: String,
    #[serde(default)]
    pub default_level: i64,
}

fn default_origin() -> String {
    "system".to_string()
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            origin_field: None,
            level_field: None,
            default_origin: default_origin(),
            default_level: 0,
        }
    }
}

/// Pure function from `(source type, raw payload)` to canonical events.
/// No side effects, no I/O.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizerOptions,
}

impl Normalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    /// Decode and normalize one raw event.
    ///
    /// Multi-row input (CSV, JSON arrays) yields several events; each row
    /// after the first gets a `#<index>` suffix on the dedup key so sibling
    /// rows are not suppressed as duplicates of each other.
    pub fn normalize(&self, raw: RawEvent) -> Result<Vec<IngestionEvent>, NormalizeError> {
        let payloads = decode(&raw.format, &raw.bytes)?;

        let base_key = raw
            .dedup_hint
            .clone()
            .unwrap_or_else(|| sha256_hex(&raw.bytes));

        let many = payloads.len() > 1;
        let mut events = Vec::with_capacity(payloads.len());

        for (index, payload) in payloads.into_iter().enumerate() {
            let dedup_key = if many {
                format!("{base_key}#{index}")
            } else {
                base_key.clone()
            };

            let (origin, level) = self.extract_origin(&Value::Object(payload.clone()));

            events.push(
                IngestionEvent::new(
                    raw.source_id.clone(),
                    raw.source_type,
                    raw.route.clone(),
                    payload,
                )
                .with_dedup_key(dedup_key)
                .with_origin(origin, level),
            );
        }

        Ok(events)
    }

    fn extract_origin(&self, payload: &Value) -> (String, i64) {
        let origin = self
            .options
            .origin_field
            .as_deref()
            .and_then(|path| lookup_path(payload, path))
            .and_then(value_as_string)
            .unwrap_or_else(|| self.options.default_origin.clone());

        let level = self
            .options
            .level_field
            .as_deref()
            .and_then(|path| lookup_path(payload, path))
            .and_then(Value::as_i64)
            .unwrap_or(self.options.default_level);

        (origin, level)
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
