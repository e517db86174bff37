//! The seam between the engine and whatever reacts to events.

use async_trait::async_trait;
use thiserror::Error;

use inflow_core::IngestionEvent;

/// Failure surfaced by a handler. Caught and logged by the engine, never
/// propagated past the invocation.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A reaction bound to matching events. Implementations must tolerate
/// concurrent invocations when `handler_concurrency > 1`.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &IngestionEvent) -> Result<(), HandlerError>;
}
