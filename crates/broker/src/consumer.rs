//! Broker consumer trait and message types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// A raw message received from a broker subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Unique message identifier from the broker.
    pub id: String,
    /// Raw message body.
    pub body: String,
    /// Broker-specific handle used for ack/nack (e.g. SQS receipt handle).
    pub receipt: String,
    /// Broker-assigned offset or sequence number, when the broker has one.
    pub offset: Option<String>,
    /// When the message was sent to the broker.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been delivered.
    pub attempt_count: u32,
}

/// Health status of a broker connection.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealth {
    pub connected: bool,
    pub approximate_message_count: Option<u64>,
    pub provider: String,
}

impl fmt::Display for BrokerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BrokerHealth {{ connected: {}, messages: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.provider
        )
    }
}

/// Trait for pluggable broker consumer backends.
///
/// After a broker-defined ack timeout, unacknowledged messages are
/// redelivered by the broker; implementations surface that through
/// `attempt_count` rather than tracking it themselves.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Poll up to `max_messages` from the subscription.
    ///
    /// May block for up to the provider's long-poll timeout. Returns an
    /// empty vec when no messages are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<BrokerMessage>, BrokerError>;

    /// Acknowledge successful processing; the broker commits the offset.
    async fn ack(&self, receipt: &str) -> Result<(), BrokerError>;

    /// Negative-acknowledge; the message becomes immediately redeliverable.
    async fn nack(&self, receipt: &str) -> Result<(), BrokerError>;

    /// Check connectivity and return health status.
    async fn health_check(&self) -> Result<BrokerHealth, BrokerError>;

    /// The last offset the broker has committed for this consumer, when
    /// the provider exposes one. Used as the stream adapter's cursor.
    async fn committed_offset(&self) -> Result<Option<String>, BrokerError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_roundtrip() {
        let msg = BrokerMessage {
            id: "msg-123".to_string(),
            body: r#"{"action":"deploy"}"#.to_string(),
            receipt: "handle-abc".to_string(),
            offset: Some("42".to_string()),
            timestamp: Utc::now(),
            attempt_count: 1,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: BrokerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.offset.as_deref(), Some("42"));
        assert_eq!(back.attempt_count, 1);
    }

    #[test]
    fn health_display() {
        let health = BrokerHealth {
            connected: true,
            approximate_message_count: Some(7),
            provider: "sqs".to_string(),
        };
        let text = format!("{health}");
        assert!(text.contains("connected: true"));
        assert!(text.contains('7'));
    }
}
