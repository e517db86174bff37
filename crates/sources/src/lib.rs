//! Source adapters: independent concurrent units producing events from
//! external systems.
//!
//! Seven variants implement the [`SourceAdapter`] trait: webhook receiver,
//! polled REST API, filesystem watcher, polled database, broker stream,
//! log tailer, and threshold-evaluated metric poller. Every adapter feeds
//! the manager's single bounded fan-in queue through an [`EventSink`];
//! blocking I/O stays inside the adapter's own task.

pub mod adapter;
pub mod database;
pub mod error;
pub mod file_watch;
pub mod log_tail;
pub mod metric;
pub mod polled_api;
pub mod sink;
pub mod stream;
pub mod webhook;

pub use adapter::{AdapterContext, CursorCell, SourceAdapter};
pub use error::AdapterError;
pub use sink::{AdapterStats, AdapterStatsSnapshot, EventSink};
