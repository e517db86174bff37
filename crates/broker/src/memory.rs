//! In-memory broker backend.
//!
//! Backs the stream adapter in tests and local development. Mimics
//! at-least-once broker semantics: polled messages stay in flight until
//! acked, nack returns them to the front of the queue with an incremented
//! attempt count, and the committed offset advances on ack.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::consumer::{BrokerConsumer, BrokerHealth, BrokerMessage};
use crate::error::BrokerError;

#[derive(Default)]
struct Inner {
    queue: VecDeque<BrokerMessage>,
    in_flight: HashMap<String, BrokerMessage>,
    committed_offset: Option<String>,
    next_offset: u64,
}

/// Channel-less broker that lives entirely in process memory.
#[derive(Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message body, assigning a monotonically increasing offset.
    pub fn publish(&self, body: impl Into<String>) -> String {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let offset = inner.next_offset;
        inner.next_offset += 1;

        let id = Uuid::new_v4().to_string();
        inner.queue.push_back(BrokerMessage {
            id: id.clone(),
            body: body.into(),
            receipt: format!("rcpt-{id}"),
            offset: Some(offset.to_string()),
            timestamp: Utc::now(),
            attempt_count: 1,
        });
        id
    }

    /// Number of messages neither delivered nor in flight.
    pub fn depth(&self) -> usize {
        self.inner.lock().expect("broker lock poisoned").queue.len()
    }

    /// Number of delivered-but-unacked messages.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .expect("broker lock poisoned")
            .in_flight
            .len()
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryBroker {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<BrokerMessage>, BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            match inner.queue.pop_front() {
                Some(msg) => {
                    inner.in_flight.insert(msg.receipt.clone(), msg.clone());
                    batch.push(msg);
                }
                None => break,
            }
        }
        Ok(batch)
    }

    async fn ack(&self, receipt: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let msg = inner
            .in_flight
            .remove(receipt)
            .ok_or_else(|| BrokerError::Ack(format!("unknown receipt: {receipt}")))?;
        if msg.offset.is_some() {
            inner.committed_offset = msg.offset;
        }
        Ok(())
    }

    async fn nack(&self, receipt: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let mut msg = inner
            .in_flight
            .remove(receipt)
            .ok_or_else(|| BrokerError::Ack(format!("unknown receipt: {receipt}")))?;
        msg.attempt_count += 1;
        inner.queue.push_front(msg);
        Ok(())
    }

    async fn health_check(&self) -> Result<BrokerHealth, BrokerError> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        Ok(BrokerHealth {
            connected: true,
            approximate_message_count: Some(inner.queue.len() as u64),
            provider: "memory".to_string(),
        })
    }

    async fn committed_offset(&self) -> Result<Option<String>, BrokerError> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        Ok(inner.committed_offset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_poll_ack_advances_offset() {
        let broker = InMemoryBroker::new();
        broker.publish("a");
        broker.publish("b");
        assert_eq!(broker.depth(), 2);

        let batch = broker.poll_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(broker.in_flight(), 2);

        broker.ack(&batch[0].receipt).await.unwrap();
        broker.ack(&batch[1].receipt).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(
            broker.committed_offset().await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn nack_redelivers_with_bumped_attempt() {
        let broker = InMemoryBroker::new();
        broker.publish("a");

        let batch = broker.poll_batch(1).await.unwrap();
        broker.nack(&batch[0].receipt).await.unwrap();

        let again = broker.poll_batch(1).await.unwrap();
        assert_eq!(again[0].body, "a");
        assert_eq!(again[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn unknown_receipt_is_error() {
        let broker = InMemoryBroker::new();
        assert!(broker.ack("nope").await.is_err());
    }
}
