//! Webhook receiver: an HTTP listener that turns inbound POSTs into events.
//!
//! Unlike the polling adapters, the webhook source is push-driven. It binds
//! its listener during `start` so a bad address fails fast, then serves
//! until cancellation. Request bodies are verified against a shared-secret
//! HMAC when one is configured and rejected with 401 on mismatch.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use inflow_core::SourceType;
use inflow_normalize::{PayloadFormat, RawEvent};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;
use crate::sink::EventSink;

fn default_path() -> String {
    "/hooks".to_string()
}

fn default_delivery_id_header() -> String {
    "X-Delivery-Id".to_string()
}

fn default_signature_header() -> String {
    "X-Signature".to_string()
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Address the listener binds, e.g. `127.0.0.1:3610`.
    pub bind_addr: String,
    /// URL path the hook is served on; also the route events carry.
    #[serde(default = "default_path")]
    pub path: String,
    /// Shared secret for HMAC-SHA256 body verification. No secret means
    /// no verification.
    #[serde(default)]
    pub secret: Option<String>,
    /// Header carrying the provider's delivery id, used as the dedup key.
    #[serde(default = "default_delivery_id_header")]
    pub delivery_id_header: String,
    /// Header carrying the hex HMAC signature, with or without a
    /// `sha256=` prefix.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
}

pub struct WebhookSource {
    id: String,
    config: WebhookConfig,
    listener: Mutex<Option<TcpListener>>,
    bound: std::sync::Mutex<Option<std::net::SocketAddr>>,
}

impl WebhookSource {
    pub fn new(id: impl Into<String>, config: WebhookConfig) -> Self {
        Self {
            id: id.into(),
            config,
            listener: Mutex::new(None),
            bound: std::sync::Mutex::new(None),
        }
    }

    /// Actual listening address once `start` has bound the socket. Useful
    /// when `bind_addr` uses port 0.
    pub fn bound_addr(&self) -> Option<std::net::SocketAddr> {
        *self.bound.lock().expect("bound lock poisoned")
    }
}

/// Per-request state shared with the axum handler.
#[derive(Clone)]
pub struct WebhookState {
    pub source_id: String,
    pub config: Arc<WebhookConfig>,
    pub sink: EventSink,
}

/// Router serving the configured hook path. Public so tests can drive it
/// with `tower::ServiceExt::oneshot` without binding a socket.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route(&state.config.path, post(receive))
        .with_state(state)
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.config.secret {
        if !signature_valid(secret, &headers, &state.config.signature_header, &body) {
            warn!(source_id = %state.source_id, "webhook signature mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid signature" })),
            );
        }
    }

    let dedup_hint = headers
        .get(&state.config.delivery_id_header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let raw = RawEvent {
        source_id: state.source_id.clone(),
        source_type: SourceType::Webhook,
        route: state.config.path.trim_start_matches('/').to_string(),
        format: state.config.format.clone(),
        bytes: body.to_vec(),
        dedup_hint,
    };

    match state.sink.submit_raw(raw).await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({ "status": "accepted", "events": count })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

fn signature_valid(secret: &str, headers: &HeaderMap, header_name: &str, body: &[u8]) -> bool {
    let Some(provided) = headers.get(header_name).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(decoded) = hex::decode(provided) else {
        return false;
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

#[async_trait]
impl SourceAdapter for WebhookSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::Webhook
    }

    async fn start(&self, _ctx: &AdapterContext) -> Result<(), AdapterError> {
        if !self.config.path.starts_with('/') {
            return Err(AdapterError::Config(format!(
                "webhook path must start with '/': {}",
                self.config.path
            )));
        }
        self.config
            .format
            .validate()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| {
                AdapterError::Config(format!("cannot bind {}: {e}", self.config.bind_addr))
            })?;
        info!(source_id = %self.id, addr = %self.config.bind_addr, "webhook listener bound");
        if let Ok(addr) = listener.local_addr() {
            *self.bound.lock().expect("bound lock poisoned") = Some(addr);
        }
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let listener = match self.listener.lock().await.take() {
            Some(listener) => listener,
            // Restart after a crash: start() was not re-run, so rebind.
            None => TcpListener::bind(&self.config.bind_addr).await?,
        };

        let state = WebhookState {
            source_id: self.id.clone(),
            config: Arc::new(self.config.clone()),
            sink: ctx.sink.clone(),
        };
        let router = webhook_router(state);

        let shutdown = ctx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| AdapterError::Other(format!("webhook server failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use inflow_core::IngestionEvent;
    use inflow_normalize::Normalizer;

    use crate::sink::AdapterStats;

    fn test_state(secret: Option<&str>) -> (WebhookState, mpsc::Receiver<IngestionEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let sink = EventSink::new(
            "hook-1",
            tx,
            StdArc::new(Normalizer::default()),
            Duration::from_millis(50),
            StdArc::new(AdapterStats::default()),
        );
        let state = WebhookState {
            source_id: "hook-1".to_string(),
            config: Arc::new(WebhookConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                path: "/hooks/github".to_string(),
                secret: secret.map(str::to_string),
                delivery_id_header: default_delivery_id_header(),
                signature_header: default_signature_header(),
                format: PayloadFormat::Json,
            }),
            sink,
        };
        (state, rx)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn accepts_valid_post_and_emits_event() {
        let (state, mut rx) = test_state(None);
        let router = webhook_router(state);

        let response = router
            .oneshot(
                axum::http::Request::post("/hooks/github")
                    .header("X-Delivery-Id", "d-1")
                    .body(axum::body::Body::from(r#"{"action":"opened"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.route, "hooks/github");
        assert_eq!(event.dedup_key.as_deref(), Some("d-1"));
        assert_eq!(event.payload["action"], "opened");
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let (state, mut rx) = test_state(Some("s3cr3t"));
        let router = webhook_router(state);

        let response = router
            .oneshot(
                axum::http::Request::post("/hooks/github")
                    .header("X-Signature", "sha256=deadbeef")
                    .body(axum::body::Body::from(r#"{"a":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn accepts_valid_signature() {
        let (state, mut rx) = test_state(Some("s3cr3t"));
        let router = webhook_router(state);
        let body = br#"{"a":1}"#;

        let response = router
            .oneshot(
                axum::http::Request::post("/hooks/github")
                    .header("X-Signature", sign("s3cr3t", body))
                    .body(axum::body::Body::from(body.as_slice()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn undecodable_body_is_bad_request() {
        let (state, _rx) = test_state(None);
        let router = webhook_router(state);

        let response = router
            .oneshot(
                axum::http::Request::post("/hooks/github")
                    .body(axum::body::Body::from("}{"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
    }
}
