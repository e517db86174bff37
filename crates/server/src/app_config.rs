//! YAML application config: which sources to run and which bindings to
//! register. Env config ([`inflow_core::Config`]) covers the engine's
//! knobs; this file covers the operator-defined topology.
//!
//! ```yaml
//! sources:
//!   - id: gh
//!     type: webhook
//!     bind_addr: 127.0.0.1:3610
//!     path: /github/push
//!     secret: s3cr3t
//!   - id: app-log
//!     type: log_tail
//!     path: /var/log/app.log
//!     format: syslog
//! bindings:
//!   - scope: webhook
//!     pattern: github/*
//!     cooldown_secs: 30
//!     handler:
//!       type: forward
//!       url: https://automation.internal/hooks/inflow
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use inflow_core::SourceType;
use inflow_dispatch::{BindingScope, FanPolicy};
use inflow_normalize::NormalizerOptions;
use inflow_sources::database::DatabaseConfig;
use inflow_sources::file_watch::FileWatchConfig;
use inflow_sources::log_tail::LogTailConfig;
use inflow_sources::metric::MetricConfig;
use inflow_sources::polled_api::PolledApiConfig;
use inflow_sources::stream::StreamConfig;
use inflow_sources::webhook::WebhookConfig;

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    /// Origin/level extraction for this source's payloads.
    #[serde(default)]
    pub normalizer: NormalizerOptions,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Webhook(WebhookConfig),
    PolledApi(PolledApiConfig),
    FileWatch(FileWatchConfig),
    Database(DatabaseConfig),
    Stream(StreamSpec),
    LogTail(LogTailConfig),
    Metric(MetricSpec),
}

#[derive(Debug, Deserialize)]
pub struct StreamSpec {
    #[serde(flatten)]
    pub stream: StreamConfig,
    pub broker: BrokerSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokerSpec {
    Sqs(inflow_broker::SqsBrokerConfig),
    /// In-process broker; only useful for local experiments.
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct MetricSpec {
    #[serde(flatten)]
    pub metric: MetricConfig,
    /// JSON endpoint to sample.
    pub endpoint: String,
    /// Dot-path to the numeric value within the response.
    pub value_path: String,
}

fn default_scope() -> String {
    "any".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BindingSpec {
    /// `any` or a source type name (`webhook`, `log_tail`, ...).
    #[serde(default = "default_scope")]
    pub scope: String,
    pub pattern: String,
    #[serde(default)]
    pub required_level: i64,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub fan_policy: FanPolicy,
    pub handler: HandlerSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// POST the event JSON to a URL.
    Forward { url: String },
    /// Log the event at info level.
    Log,
}

pub fn parse_scope(scope: &str) -> anyhow::Result<BindingScope> {
    let scope = match scope {
        "any" => BindingScope::Any,
        "webhook" => BindingScope::Source(SourceType::Webhook),
        "polled_api" => BindingScope::Source(SourceType::PolledApi),
        "file_watch" => BindingScope::Source(SourceType::FileWatch),
        "database" => BindingScope::Source(SourceType::Database),
        "stream" => BindingScope::Source(SourceType::Stream),
        "log_tail" => BindingScope::Source(SourceType::LogTail),
        "metric" => BindingScope::Source(SourceType::Metric),
        other => anyhow::bail!("unknown binding scope: {other}"),
    };
    Ok(scope)
}
