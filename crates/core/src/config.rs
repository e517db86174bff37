//! Environment-driven configuration.
//!
//! All knobs come from environment variables with sensible defaults so the
//! engine can start with nothing but a source/binding file. Call
//! [`load_dotenv`] before [`Config::from_env`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub supervisor: SupervisorConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            ingest: IngestConfig::from_env(),
            supervisor: SupervisorConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:     {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  ingest:     queue_capacity={}, dedup_window={}s, dedup_max={}",
            self.ingest.queue_capacity,
            self.ingest.dedup_window_secs,
            self.ingest.dedup_max_entries,
        );
        tracing::info!(
            "  supervisor: backoff={}ms..{}ms x{}, max_retries={}",
            self.supervisor.backoff_base_ms,
            self.supervisor.backoff_cap_ms,
            self.supervisor.backoff_factor,
            self.supervisor.max_retries,
        );
        tracing::info!(
            "  dispatch:   handler_concurrency={}",
            self.dispatch.handler_concurrency
        );
        tracing::info!("  data_dir:   {}", self.ingest.data_dir.display());
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("INFLOW_HOST", "0.0.0.0"),
            port: env_u16("INFLOW_PORT", 3600),
        }
    }
}

// ── Ingestion ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the bounded fan-in queue all adapters share.
    pub queue_capacity: usize,
    /// How long an adapter may block when the fan-in queue is full before
    /// dropping the event and counting an overflow.
    pub max_enqueue_wait_ms: u64,
    /// Time window within which a repeated dedup key is suppressed.
    pub dedup_window_secs: u64,
    /// Size bound of the dedup cache.
    pub dedup_max_entries: usize,
    /// Directory for persisted cursors (resume tokens).
    pub data_dir: PathBuf,
}

impl IngestConfig {
    fn from_env() -> Self {
        Self {
            queue_capacity: env_usize("INFLOW_QUEUE_CAPACITY", 1024),
            max_enqueue_wait_ms: env_u64("INFLOW_MAX_ENQUEUE_WAIT_MS", 500),
            dedup_window_secs: env_u64("INFLOW_DEDUP_WINDOW_SECS", 300),
            dedup_max_entries: env_usize("INFLOW_DEDUP_MAX_ENTRIES", 10_000),
            data_dir: PathBuf::from(env_or("INFLOW_DATA_DIR", "data")),
        }
    }

    pub fn max_enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.max_enqueue_wait_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

// ── Supervisor / backoff ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub backoff_cap_ms: u64,
    /// Start attempts before an adapter is declared Dead.
    pub max_retries: u32,
}

impl SupervisorConfig {
    fn from_env() -> Self {
        Self {
            backoff_base_ms: env_u64("INFLOW_BACKOFF_BASE_MS", 1_000),
            backoff_factor: env_u32("INFLOW_BACKOFF_FACTOR", 2),
            backoff_cap_ms: env_u64("INFLOW_BACKOFF_CAP_MS", 60_000),
            max_retries: env_u32("INFLOW_MAX_RETRIES", 5),
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of handler bodies that may execute concurrently. 1 keeps the
    /// engine fully serial.
    pub handler_concurrency: usize,
}

impl DispatchConfig {
    fn from_env() -> Self {
        Self {
            handler_concurrency: env_usize("INFLOW_HANDLER_CONCURRENCY", 1).max(1),
        }
    }
}
