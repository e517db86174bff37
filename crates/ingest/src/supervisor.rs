//! Per-adapter supervision and restart policy.
//!
//! Each registered adapter runs under one supervisor task that drives the
//! lifecycle state machine: Starting, Running, Backoff between failed
//! attempts, Dead once `max_retries` start attempts are exhausted. A dying
//! source announces itself with exactly one event on the regular dispatch
//! path (route `source.dead.<adapter_id>`) so operators can bind alerts to
//! it like any other event.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use inflow_core::{IngestionEvent, Payload, SourceState, SourceStatus, SupervisorConfig};
use inflow_sources::{AdapterContext, SourceAdapter};

pub(crate) struct Supervisor {
    pub adapter: Arc<dyn SourceAdapter>,
    pub ctx: AdapterContext,
    pub state: Arc<RwLock<SourceState>>,
    pub config: SupervisorConfig,
}

impl Supervisor {
    /// Drive the adapter until clean shutdown or Dead.
    pub async fn run(self) {
        let id = self.adapter.adapter_id().to_string();
        let mut attempt: u32 = 0;

        loop {
            if self.ctx.is_cancelled() {
                self.set_status(SourceStatus::Stopped, None);
                return;
            }

            self.set_status(SourceStatus::Starting, None);
            match self.adapter.start(&self.ctx).await {
                Ok(()) => {
                    attempt = 0;
                    self.set_status(SourceStatus::Running, None);
                    {
                        let mut state = self.state.write().expect("state lock poisoned");
                        state.retry_count = 0;
                        state.last_poll_at = Some(Utc::now());
                    }
                    info!(adapter_id = %id, "source running");

                    let result = self.adapter.run(&self.ctx).await;
                    if let Err(e) = self.adapter.flush(&self.ctx).await {
                        warn!(adapter_id = %id, error = %e, "flush failed during shutdown");
                    }

                    match result {
                        _ if self.ctx.is_cancelled() => {
                            self.set_status(SourceStatus::Stopped, None);
                            info!(adapter_id = %id, "source stopped");
                            return;
                        }
                        Ok(()) => {
                            // run() finished on its own; nothing left to produce.
                            self.set_status(SourceStatus::Stopped, None);
                            info!(adapter_id = %id, "source completed");
                            return;
                        }
                        Err(e) => {
                            warn!(adapter_id = %id, error = %e, "source failed mid-run, restarting");
                            self.set_status(SourceStatus::Backoff, Some(e.to_string()));
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(adapter_id = %id, error = %e, "unrecoverable configuration, source dead");
                    self.mark_dead(e.to_string()).await;
                    return;
                }
                Err(e) => {
                    warn!(adapter_id = %id, error = %e, attempt = attempt + 1, "source start failed");
                    self.set_status(SourceStatus::Backoff, Some(e.to_string()));
                }
            }

            attempt += 1;
            {
                let mut state = self.state.write().expect("state lock poisoned");
                state.retry_count = attempt;
            }
            if attempt >= self.config.max_retries {
                let last_error = self
                    .state
                    .read()
                    .expect("state lock poisoned")
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                error!(adapter_id = %id, retries = attempt, "retries exhausted, source dead");
                self.mark_dead(last_error).await;
                return;
            }

            let delay = backoff_delay(&self.config, attempt);
            info!(adapter_id = %id, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                _ = self.ctx.cancelled() => {
                    self.set_status(SourceStatus::Stopped, None);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn set_status(&self, status: SourceStatus, error: Option<String>) {
        let mut state = self.state.write().expect("state lock poisoned");
        state.status = status;
        if error.is_some() {
            state.last_error = error;
        }
    }

    /// Transition to Dead and emit the one-and-only dead notification.
    async fn mark_dead(&self, last_error: String) {
        self.set_status(SourceStatus::Dead, Some(last_error.clone()));

        let id = self.adapter.adapter_id();
        let mut payload = Payload::new();
        payload.insert("adapter_id".to_string(), json!(id));
        payload.insert(
            "source_type".to_string(),
            json!(self.adapter.source_type().as_str()),
        );
        payload.insert("error".to_string(), json!(last_error));

        let event = IngestionEvent::new(
            id,
            self.adapter.source_type(),
            format!("source.dead.{id}"),
            payload,
        );
        self.ctx.sink.send(event).await;
    }
}

/// Exponential delay for the given attempt (1-based), capped, with a
/// small jitter derived from the clock's nanosecond fraction.
pub(crate) fn backoff_delay(config: &SupervisorConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay_ms = config
        .backoff_base_ms
        .saturating_mul((config.backoff_factor as u64).saturating_pow(exponent))
        .min(config.backoff_cap_ms);

    let jitter_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        % 100;

    Duration::from_millis(delay_ms + jitter_ms as u64)
}
