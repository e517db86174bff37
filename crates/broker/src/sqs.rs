//! AWS SQS consumer backend.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consumer::{BrokerConsumer, BrokerHealth, BrokerMessage};
use crate::error::BrokerError;

/// Connection settings for an SQS-backed stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsBrokerConfig {
    pub queue_url: String,
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Endpoint override for local emulators.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u32,
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u32,
}

fn default_visibility_timeout() -> u32 {
    30
}

fn default_wait_time() -> u32 {
    20
}

/// SQS-backed broker consumer.
pub struct SqsBroker {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
}

impl SqsBroker {
    /// Create a consumer from config.
    ///
    /// The SQS client config is built directly rather than from
    /// `aws_config::defaults()` so an `AWS_ENDPOINT_URL` pointing at a
    /// different service cannot hijack queue requests.
    pub async fn new(config: &SqsBrokerConfig) -> Result<Self, BrokerError> {
        if config.queue_url.is_empty() {
            return Err(BrokerError::Config("queue_url is empty".to_string()));
        }

        let region = aws_sdk_sqs::config::Region::new(config.region.clone());
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                config.session_token.clone(),
                None,
                "inflow-broker-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        if let Some(endpoint) = config.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("https://{endpoint}")
            };
            sqs_config = sqs_config.endpoint_url(&url);
        }

        let client = Client::from_conf(sqs_config.build());

        info!(
            queue_url = %config.queue_url,
            region = %config.region,
            "SQS broker consumer initialized"
        );

        Ok(Self {
            client,
            queue_url: config.queue_url.clone(),
            visibility_timeout_secs: config.visibility_timeout_secs as i32,
            wait_time_secs: config.wait_time_secs.min(20) as i32,
        })
    }
}

#[async_trait]
impl BrokerConsumer for SqsBroker {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<BrokerMessage>, BrokerError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.min(10) as i32;

        debug!(max_messages = capped, "polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());

        for msg in sqs_messages {
            let id = msg.message_id().unwrap_or("unknown").to_string();
            let body = msg.body().unwrap_or("").to_string();
            let receipt = msg
                .receipt_handle()
                .ok_or_else(|| BrokerError::Parse("missing receipt handle".into()))?
                .to_string();

            let offset = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SequenceNumber))
                .map(|s| s.to_string());

            let timestamp = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(BrokerMessage {
                id,
                body,
                receipt,
                offset,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt: &str) -> Result<(), BrokerError> {
        debug!(receipt, "acking SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| BrokerError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn nack(&self, receipt: &str) -> Result<(), BrokerError> {
        debug!(receipt, "nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("SQS visibility change failed: {e:?}")))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<BrokerHealth, BrokerError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(format!("SQS health check failed: {e:?}")))?;

        let count = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok());

        Ok(BrokerHealth {
            connected: true,
            approximate_message_count: count,
            provider: "sqs".to_string(),
        })
    }
}
