//! The capability surface every source adapter implements.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;

use inflow_core::SourceType;

use crate::error::AdapterError;
use crate::sink::EventSink;

/// Shared resume-token cell.
///
/// The adapter writes its position (file offset, row key, broker offset,
/// ETag) as it progresses; the manager reads it for health reporting and
/// persists it across restarts.
#[derive(Debug, Clone, Default)]
pub struct CursorCell(Arc<RwLock<Option<String>>>);

impl CursorCell {
    pub fn new(initial: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn load(&self) -> Option<String> {
        self.0.read().expect("cursor lock poisoned").clone()
    }

    pub fn store(&self, cursor: impl Into<String>) {
        *self.0.write().expect("cursor lock poisoned") = Some(cursor.into());
    }

    pub fn clear(&self) {
        *self.0.write().expect("cursor lock poisoned") = None;
    }
}

/// Everything the manager hands an adapter at spawn time.
#[derive(Clone)]
pub struct AdapterContext {
    /// Bounded entry point into the fan-in queue.
    pub sink: EventSink,
    /// Becomes `true` when the manager requests shutdown.
    pub cancel: watch::Receiver<bool>,
    /// Resume token shared with the manager.
    pub cursor: CursorCell,
}

impl AdapterContext {
    /// Wait until the manager signals cancellation.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        while !*cancel.borrow() {
            if cancel.changed().await.is_err() {
                // Manager dropped the sender; treat as cancelled.
                return;
            }
        }
    }

    /// Non-blocking check of the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// A unit producing events from one external system.
///
/// Lifecycle, driven by the manager's supervisor loop:
/// 1. `start`: validate config and establish the first connection/probe.
///    Unrecoverable configuration (bad path, invalid pattern, bad URL)
///    must fail here, before the source is ever marked Running.
/// 2. `run`: produce events until cancellation; returning `Err` sends the
///    adapter through the backoff state machine.
/// 3. `flush`: commit in-flight work (broker acks, cursor positions)
///    during graceful shutdown.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn adapter_id(&self) -> &str;

    fn source_type(&self) -> SourceType;

    async fn start(&self, ctx: &AdapterContext) -> Result<(), AdapterError>;

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError>;

    async fn flush(&self, _ctx: &AdapterContext) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_cell_roundtrip() {
        let cell = CursorCell::default();
        assert!(cell.load().is_none());
        cell.store("1234:99");
        assert_eq!(cell.load().as_deref(), Some("1234:99"));
        cell.clear();
        assert!(cell.load().is_none());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_signal() {
        let (tx, rx) = watch::channel(false);
        let ctx_cancel = rx;
        assert!(!*ctx_cancel.borrow());

        let mut waiter = ctx_cancel.clone();
        let handle = tokio::spawn(async move {
            while !*waiter.borrow() {
                if waiter.changed().await.is_err() {
                    break;
                }
            }
        });

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
