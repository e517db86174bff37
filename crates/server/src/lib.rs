//! Inflow server binary support: YAML topology loading, adapter and
//! binding wiring, built-in handlers, and the HTTP API.

pub mod api;
pub mod app_config;
pub mod bootstrap;
pub mod handlers;

pub use api::{router, AppState};
pub use app_config::AppConfig;
pub use bootstrap::{build, EngineConsumer};
