//! Broker stream source.
//!
//! Consumes messages from a queue/stream backend behind the
//! [`BrokerConsumer`] trait and emits one event per message. Messages that
//! fail to decode are acked anyway; redelivering a poison message forever
//! helps nobody, and the failure is counted on the adapter's stats.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use inflow_broker::{BrokerConsumer, BrokerMessage};
use inflow_core::SourceType;
use inflow_normalize::{PayloadFormat, RawEvent};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;

/// When consumed messages are acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Ack each message as soon as it is enqueued.
    #[default]
    Auto,
    /// Collect receipts and ack them in `flush`, trading redelivery on
    /// crash for no loss on crash.
    Manual,
}

fn default_max_batch() -> u32 {
    10
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Logical topic name; becomes the route on emitted events.
    pub topic: String,
    #[serde(default = "default_max_batch")]
    pub max_batch: u32,
    /// Pause between polls when the backend returned nothing.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
}

pub struct StreamSource {
    id: String,
    config: StreamConfig,
    consumer: Arc<dyn BrokerConsumer>,
    pending_acks: Mutex<Vec<String>>,
}

impl StreamSource {
    pub fn new(
        id: impl Into<String>,
        config: StreamConfig,
        consumer: Arc<dyn BrokerConsumer>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            consumer,
            pending_acks: Mutex::new(Vec::new()),
        }
    }

    async fn handle_message(
        &self,
        ctx: &AdapterContext,
        message: BrokerMessage,
    ) -> Result<(), AdapterError> {
        let dedup_hint = message.offset.clone().unwrap_or_else(|| message.id.clone());

        let raw = RawEvent {
            source_id: self.id.clone(),
            source_type: SourceType::Stream,
            route: self.config.topic.clone(),
            format: self.config.format.clone(),
            bytes: message.body.into_bytes(),
            dedup_hint: Some(dedup_hint),
        };

        if ctx.sink.submit_raw(raw).await.is_err() {
            warn!(
                source_id = %self.id,
                message_id = %message.id,
                attempt = message.attempt_count,
                "dropping undecodable stream message"
            );
        }

        match self.config.ack_mode {
            AckMode::Auto => self.consumer.ack(&message.receipt).await?,
            AckMode::Manual => self
                .pending_acks
                .lock()
                .await
                .push(message.receipt.clone()),
        }

        if let Some(offset) = message.offset {
            ctx.cursor.store(offset);
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for StreamSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::Stream
    }

    async fn start(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        if self.config.topic.is_empty() {
            return Err(AdapterError::Config("topic must not be empty".to_string()));
        }
        self.config
            .format
            .validate()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        let health = self.consumer.health_check().await?;
        if let Some(offset) = self.consumer.committed_offset().await? {
            ctx.cursor.store(offset);
        }
        info!(
            source_id = %self.id,
            provider = %health.provider,
            backlog = ?health.approximate_message_count,
            "stream source connected"
        );
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }

            let batch = self.consumer.poll_batch(self.config.max_batch).await?;
            if batch.is_empty() {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(self.config.idle_delay_ms)) => {}
                }
                continue;
            }

            debug!(source_id = %self.id, count = batch.len(), "polled stream batch");
            for message in batch {
                self.handle_message(ctx, message).await?;
            }
        }
    }

    async fn flush(&self, _ctx: &AdapterContext) -> Result<(), AdapterError> {
        let receipts: Vec<String> = std::mem::take(&mut *self.pending_acks.lock().await);
        for receipt in receipts {
            self.consumer.ack(&receipt).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::{mpsc, watch};

    use inflow_broker::InMemoryBroker;
    use inflow_core::IngestionEvent;
    use inflow_normalize::Normalizer;

    use crate::adapter::CursorCell;
    use crate::sink::{AdapterStats, EventSink};

    fn test_ctx() -> (
        AdapterContext,
        mpsc::Receiver<IngestionEvent>,
        watch::Sender<bool>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = AdapterContext {
            sink: EventSink::new(
                "stream-1",
                tx,
                Arc::new(Normalizer::default()),
                Duration::from_millis(50),
                Arc::new(AdapterStats::default()),
            ),
            cancel: cancel_rx,
            cursor: CursorCell::default(),
        };
        (ctx, rx, cancel_tx)
    }

    fn source(ack_mode: AckMode, broker: Arc<InMemoryBroker>) -> StreamSource {
        StreamSource::new(
            "stream-1",
            StreamConfig {
                topic: "orders".to_string(),
                max_batch: 10,
                idle_delay_ms: 10,
                ack_mode,
                format: PayloadFormat::Json,
            },
            broker,
        )
    }

    #[tokio::test]
    async fn auto_mode_acks_and_advances_cursor() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.publish(r#"{"n":1}"#);
        let source = source(AckMode::Auto, broker.clone());
        let (ctx, mut rx, _cancel) = test_ctx();

        let batch = broker.poll_batch(10).await.unwrap();
        source.handle_message(&ctx, batch[0].clone()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.route, "orders");
        assert_eq!(event.dedup_key.as_deref(), Some("0"));
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(ctx.cursor.load().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn manual_mode_acks_on_flush() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.publish(r#"{"n":1}"#);
        let source = source(AckMode::Manual, broker.clone());
        let (ctx, _rx, _cancel) = test_ctx();

        let batch = broker.poll_batch(10).await.unwrap();
        source.handle_message(&ctx, batch[0].clone()).await.unwrap();
        assert_eq!(broker.in_flight(), 1);

        source.flush(&ctx).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn undecodable_message_is_acked_not_redelivered() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.publish("not json");
        let source = source(AckMode::Auto, broker.clone());
        let (ctx, _rx, _cancel) = test_ctx();

        let batch = broker.poll_batch(10).await.unwrap();
        source.handle_message(&ctx, batch[0].clone()).await.unwrap();

        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.depth(), 0);
        assert_eq!(ctx.sink.stats().snapshot().normalize_failures, 1);
    }

    #[tokio::test]
    async fn start_restores_committed_offset() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.publish(r#"{"n":1}"#);
        let batch = broker.poll_batch(1).await.unwrap();
        broker.ack(&batch[0].receipt).await.unwrap();

        let source = source(AckMode::Auto, broker);
        let (ctx, _rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();
        assert_eq!(ctx.cursor.load().as_deref(), Some("0"));
    }
}
