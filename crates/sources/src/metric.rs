//! Threshold-evaluated metric source.
//!
//! Samples a numeric value on an interval and compares it against a
//! configured threshold. Events are emitted only on state transitions
//! (ok to breached, breached to ok), never on every sample, so a metric
//! sitting above its threshold produces one event, not one per poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use inflow_core::{IngestionEvent, Payload, SourceType};
use inflow_normalize::{lookup_path, sha256_hex};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;

/// Comparison applied to each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl ThresholdOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Threshold {
    pub operator: ThresholdOp,
    pub value: f64,
}

impl Threshold {
    pub fn breached(&self, sample: f64) -> bool {
        match self.operator {
            ThresholdOp::Gt => sample > self.value,
            ThresholdOp::Gte => sample >= self.value,
            ThresholdOp::Lt => sample < self.value,
            ThresholdOp::Lte => sample <= self.value,
            ThresholdOp::Eq => (sample - self.value).abs() < f64::EPSILON,
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    /// Metric name; becomes the route on emitted events.
    pub name: String,
    pub threshold: Threshold,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Where samples come from. The HTTP sampler covers the common case;
/// tests plug in a scripted one.
#[async_trait]
pub trait MetricSampler: Send + Sync {
    async fn sample(&self) -> Result<f64, AdapterError>;
}

/// Samples a numeric value out of a JSON HTTP endpoint.
pub struct HttpSampler {
    client: Client,
    url: String,
    value_path: String,
}

impl HttpSampler {
    pub fn new(url: impl Into<String>, value_path: impl Into<String>) -> Result<Self, AdapterError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            value_path: value_path.into(),
        })
    }
}

#[async_trait]
impl MetricSampler for HttpSampler {
    async fn sample(&self) -> Result<f64, AdapterError> {
        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        lookup_path(&body, &self.value_path)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                AdapterError::Other(format!("no numeric value at {}", self.value_path))
            })
    }
}

pub struct MetricSource {
    id: String,
    config: MetricConfig,
    sampler: Arc<dyn MetricSampler>,
    last_breached: Mutex<Option<bool>>,
}

impl MetricSource {
    pub fn new(
        id: impl Into<String>,
        config: MetricConfig,
        sampler: Arc<dyn MetricSampler>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            sampler,
            last_breached: Mutex::new(None),
        }
    }

    /// Evaluate one sample; emits only when the breach state flips.
    /// The very first sample emits only if it already breaches.
    async fn evaluate(&self, ctx: &AdapterContext, sample: f64) {
        let breached = self.config.threshold.breached(sample);

        let transition = {
            let mut last = self.last_breached.lock().await;
            let changed = last.map_or(breached, |prev| prev != breached);
            *last = Some(breached);
            changed
        };
        if !transition {
            return;
        }

        let state = if breached { "breached" } else { "recovered" };
        debug!(source_id = %self.id, metric = %self.config.name, value = sample, state, "threshold transition");

        let mut payload = Payload::new();
        payload.insert("metric".to_string(), json!(self.config.name));
        payload.insert("value".to_string(), json!(sample));
        payload.insert("threshold".to_string(), json!(self.config.threshold.value));
        payload.insert(
            "operator".to_string(),
            json!(self.config.threshold.operator.as_str()),
        );
        payload.insert("state".to_string(), json!(state));

        let stamp = Utc::now().to_rfc3339();
        let dedup_key = sha256_hex(format!("{}:{}:{}", self.config.name, state, stamp).as_bytes());
        let event = IngestionEvent::new(
            self.id.clone(),
            SourceType::Metric,
            self.config.name.clone(),
            payload,
        )
        .with_dedup_key(dedup_key);
        ctx.sink.send(event).await;
    }
}

#[async_trait]
impl SourceAdapter for MetricSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::Metric
    }

    async fn start(&self, _ctx: &AdapterContext) -> Result<(), AdapterError> {
        if self.config.name.is_empty() {
            return Err(AdapterError::Config(
                "metric name must not be empty".to_string(),
            ));
        }
        if self.config.interval_secs == 0 {
            return Err(AdapterError::Config(
                "interval_secs must be greater than zero".to_string(),
            ));
        }

        // Probe without evaluating so startup never fires a transition.
        let sample = self.sampler.sample().await?;
        info!(source_id = %self.id, metric = %self.config.name, value = sample, "metric source probed");
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    match self.sampler.sample().await {
                        Ok(sample) => self.evaluate(ctx, sample).await,
                        Err(e) => {
                            ctx.sink.record_poll_error();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::{mpsc, watch};

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
                "metric-1",
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

    fn source(operator: ThresholdOp, value: f64) -> MetricSource {
        struct Never;
        #[async_trait]
        impl MetricSampler for Never {
            async fn sample(&self) -> Result<f64, AdapterError> {
                Err(AdapterError::Other("not sampled in tests".to_string()))
            }
        }
        MetricSource::new(
            "metric-1",
            MetricConfig {
                name: "cpu.load".to_string(),
                threshold: Threshold { operator, value },
                interval_secs: 60,
            },
            Arc::new(Never),
        )
    }

    #[test]
    fn threshold_operators() {
        let t = Threshold {
            operator: ThresholdOp::Gt,
            value: 0.8,
        };
        assert!(t.breached(0.9));
        assert!(!t.breached(0.8));

        let t = Threshold {
            operator: ThresholdOp::Lte,
            value: 10.0,
        };
        assert!(t.breached(10.0));
        assert!(!t.breached(10.1));
    }

    #[tokio::test]
    async fn emits_only_on_transitions() {
        let source = source(ThresholdOp::Gt, 0.8);
        let (ctx, mut rx, _cancel) = test_ctx();

        // Below threshold from the start: silence.
        source.evaluate(&ctx, 0.5).await;
        source.evaluate(&ctx, 0.6).await;
        assert!(rx.try_recv().is_err());

        // Crossing up fires once, staying up stays quiet.
        source.evaluate(&ctx, 0.95).await;
        source.evaluate(&ctx, 0.99).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.route, "cpu.load");
        assert_eq!(event.payload["state"], "breached");
        assert_eq!(event.payload["value"], 0.95);
        assert!(rx.try_recv().is_err());

        // Recovery fires once.
        source.evaluate(&ctx, 0.2).await;
        assert_eq!(rx.try_recv().unwrap().payload["state"], "recovered");
    }

    #[tokio::test]
    async fn first_sample_already_breaching_emits() {
        let source = source(ThresholdOp::Lt, 5.0);
        let (ctx, mut rx, _cancel) = test_ctx();

        source.evaluate(&ctx, 2.0).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload["state"], "breached");
        assert_eq!(event.payload["operator"], "lt");
    }
}
