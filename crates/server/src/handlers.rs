//! Built-in dispatch handlers.

use async_trait::async_trait;
use tracing::info;

use inflow_core::IngestionEvent;
use inflow_dispatch::{Handler, HandlerError};

/// POSTs the full event JSON to a fixed URL.
pub struct ForwardHandler {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl ForwardHandler {
    pub fn new(url: impl Into<String>) -> Result<Self, HandlerError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| HandlerError::new(format!("invalid forward url {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| HandlerError::new(format!("cannot build http client: {e}")))?;
        Ok(Self {
            name: format!("forward:{url}"),
            url,
            client,
        })
    }
}

#[async_trait]
impl Handler for ForwardHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &IngestionEvent) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| HandlerError::new(format!("forward to {} failed: {e}", self.url)))?;
        response
            .error_for_status()
            .map_err(|e| HandlerError::new(format!("forward to {} rejected: {e}", self.url)))?;
        Ok(())
    }
}

/// Logs the event at info level. Useful as a catch-all while wiring up a
/// new source.
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &IngestionEvent) -> Result<(), HandlerError> {
        info!(
            event_id = %event.event_id,
            source_id = %event.source_id,
            source_type = %event.source_type,
            route = %event.route,
            origin = %event.origin,
            payload = %serde_json::Value::Object(event.payload.clone()),
            "event"
        );
        Ok(())
    }
}
