//! Polled database source.
//!
//! Runs a cursor-parameterized query on an interval and emits one event
//! per new row. The query must embed a `$CURSOR` placeholder and an
//! `ORDER BY` clause so each poll picks up strictly after the last row
//! seen; the key column's value from the final row becomes the next
//! cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use inflow_core::{Payload, SourceType};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;

const CURSOR_PLACEHOLDER: &str = "$CURSOR";

fn default_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_initial_cursor() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    pub url: String,
    /// Query with a `$CURSOR` placeholder, e.g.
    /// `SELECT * FROM events WHERE id > $CURSOR ORDER BY id LIMIT 100`.
    pub query: String,
    /// Column whose value advances the cursor and keys deduplication.
    pub key_field: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on a single query, independent of the poll interval.
    /// A hung query fails the poll instead of stalling shutdown.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Cursor used on the very first poll.
    #[serde(default = "default_initial_cursor")]
    pub initial_cursor: String,
    /// Route carried by emitted events; defaults to `db/<source id>`.
    #[serde(default)]
    pub route: Option<String>,
}

pub struct DatabaseSource {
    id: String,
    config: DatabaseConfig,
    route: String,
    pool: Mutex<Option<PgPool>>,
}

impl DatabaseSource {
    pub fn new(id: impl Into<String>, config: DatabaseConfig) -> Self {
        let id = id.into();
        let route = config.route.clone().unwrap_or_else(|| format!("db/{id}"));
        Self {
            id,
            config,
            route,
            pool: Mutex::new(None),
        }
    }

    fn validate_query(&self) -> Result<(), AdapterError> {
        if !self.config.query.contains(CURSOR_PLACEHOLDER) {
            return Err(AdapterError::Config(format!(
                "query must contain {CURSOR_PLACEHOLDER}"
            )));
        }
        if !self.config.query.to_lowercase().contains("order by") {
            return Err(AdapterError::Config(
                "query must have an ORDER BY clause for cursor advancement".to_string(),
            ));
        }
        Ok(())
    }

    async fn poll_once(&self, ctx: &AdapterContext) -> Result<usize, AdapterError> {
        let pool = {
            let guard = self.pool.lock().await;
            guard
                .clone()
                .ok_or_else(|| AdapterError::Other("database pool not initialized".to_string()))?
        };

        let cursor = ctx
            .cursor
            .load()
            .unwrap_or_else(|| self.config.initial_cursor.clone());
        let sql = self.config.query.replace(CURSOR_PLACEHOLDER, "$1");

        // Numeric cursors must be bound as integers or Postgres rejects
        // the comparison against an integer key column.
        let timeout = self.config.request_timeout_secs;
        let rows = match cursor.parse::<i64>() {
            Ok(numeric) => {
                bounded_query(timeout, sqlx::query(&sql).bind(numeric).fetch_all(&pool)).await?
            }
            Err(_) => {
                bounded_query(timeout, sqlx::query(&sql).bind(&cursor).fetch_all(&pool)).await?
            }
        };

        let mut emitted = 0;
        let mut next_cursor = None;
        for row in &rows {
            let payload = row_to_payload(row);
            let key_value = payload
                .get(&self.config.key_field)
                .map(value_to_cursor)
                .ok_or_else(|| {
                    AdapterError::Other(format!(
                        "key field {} missing from query result",
                        self.config.key_field
                    ))
                })?;

            let event = inflow_core::IngestionEvent::new(
                self.id.clone(),
                SourceType::Database,
                self.route.clone(),
                payload,
            )
            .with_dedup_key(format!("{}={}", self.config.key_field, key_value));

            if ctx.sink.send(event).await {
                emitted += 1;
            }
            next_cursor = Some(key_value);
        }

        if let Some(next) = next_cursor {
            ctx.cursor.store(next);
        }
        debug!(source_id = %self.id, rows = rows.len(), "database poll complete");
        Ok(emitted)
    }
}

/// Run one query future under the configured request timeout.
async fn bounded_query<T>(
    timeout_secs: u64,
    query: impl std::future::Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, AdapterError> {
    match tokio::time::timeout(Duration::from_secs(timeout_secs), query).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AdapterError::Other(format!(
            "query timed out after {timeout_secs}s"
        ))),
    }
}

/// Best-effort decode of one row into a structured payload. Columns with
/// types outside the handled set come through as null.
fn row_to_payload(row: &PgRow) -> Payload {
    let mut payload = Payload::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
            v.map(|t| Value::from(t.to_rfc3339())).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
            v.unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        payload.insert(column.name().to_string(), value);
    }
    payload
}

fn value_to_cursor(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SourceAdapter for DatabaseSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::Database
    }

    async fn start(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        self.validate_query()?;
        if self.config.interval_secs == 0 {
            return Err(AdapterError::Config(
                "interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.config.request_timeout_secs == 0 {
            return Err(AdapterError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&self.config.url)
            .await?;
        // Connectivity probe independent of the configured query.
        sqlx::query("SELECT 1").execute(&pool).await?;
        *self.pool.lock().await = Some(pool);

        info!(
            source_id = %self.id,
            cursor = %ctx.cursor.load().unwrap_or_else(|| self.config.initial_cursor.clone()),
            "database source connected"
        );
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(ctx).await {
                        ctx.sink.record_poll_error();
                        return Err(e);
                    }
                }
            }
        }
    }
}
