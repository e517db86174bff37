//! Ingestion side of the engine: source supervision, the bounded fan-in
//! pipeline, duplicate suppression, and cursor persistence.
//!
//! The [`IngestionManager`] is the one entry point: register adapters,
//! `start_all` with an [`EventConsumer`] (the dispatch engine in
//! production), `stop_all` with a grace period on the way down.

pub mod cursor_store;
pub mod dedup;
pub mod error;
pub mod manager;
mod supervisor;

pub use cursor_store::CursorStore;
pub use dedup::DedupCache;
pub use error::IngestError;
pub use manager::{EventConsumer, IngestionManager, ManagerStats, ManagerStatsSnapshot};
