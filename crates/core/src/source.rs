//! Per-adapter lifecycle state tracked by the ingestion manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::SourceType;

/// Lifecycle status of a registered source adapter.
///
/// Transitions are driven only by the manager's supervisor loop:
/// Stopped → Starting → Running, with Backoff between failed attempts
/// and Dead once `max_retries` is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Stopped,
    Starting,
    Running,
    Backoff,
    Dead,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Backoff => "backoff",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Health snapshot for one registered adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceState {
    pub adapter_id: String,
    pub source_type: SourceType,
    pub status: SourceStatus,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Opaque resume token: file offset + inode for log tails, last row key
    /// for database polls, broker offset for streams, ETag for polled APIs.
    pub cursor: Option<String>,
    pub retry_count: u32,
}

impl SourceState {
    pub fn new(adapter_id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            source_type,
            status: SourceStatus::Stopped,
            last_poll_at: None,
            last_error: None,
            cursor: None,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_stopped() {
        let state = SourceState::new("tail-1", SourceType::LogTail);
        assert_eq!(state.status, SourceStatus::Stopped);
        assert_eq!(state.retry_count, 0);
        assert!(state.cursor.is_none());
    }

    #[test]
    fn status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&SourceStatus::Backoff).unwrap(),
            r#""backoff""#
        );
    }
}
