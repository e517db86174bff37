//! HTTP API: health, stats, and binding introspection.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use inflow_dispatch::DispatchEngine;
use inflow_ingest::IngestionManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<IngestionManager>,
    pub engine: Arc<DispatchEngine>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: Arc<IngestionManager>, engine: Arc<DispatchEngine>) -> Self {
        Self {
            manager,
            engine,
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/bindings", get(bindings))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Overall status plus per-source state. Reports degraded when any source
/// is dead.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sources = state.manager.health();
    let dead = sources
        .values()
        .filter(|s| s.status == inflow_core::SourceStatus::Dead)
        .count();
    let status = if dead == 0 { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "dead_sources": dead,
        "sources": sources,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "pipeline": state.manager.stats(),
        "adapters": state.manager.adapter_stats(),
        "dispatch": state.engine.stats(),
    }))
}

async fn bindings(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "bindings": state.engine.registry().bindings() }))
}
