//! Turns the parsed YAML topology into a running engine: constructs each
//! source adapter, registers it with the ingestion manager, compiles the
//! bindings into the registry, and glues the pipeline to the dispatch
//! engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use inflow_broker::{BrokerConsumer, InMemoryBroker, SqsBroker};
use inflow_core::{Config, IngestionEvent};
use inflow_dispatch::{BindingRegistry, DispatchEngine, Handler};
use inflow_ingest::{EventConsumer, IngestionManager};
use inflow_sources::database::DatabaseSource;
use inflow_sources::file_watch::FileWatchSource;
use inflow_sources::log_tail::LogTailSource;
use inflow_sources::metric::{HttpSampler, MetricSource};
use inflow_sources::polled_api::PolledApiSource;
use inflow_sources::stream::StreamSource;
use inflow_sources::webhook::WebhookSource;
use inflow_sources::SourceAdapter;

use crate::app_config::{parse_scope, AppConfig, BrokerSpec, HandlerSpec, SourceKind};
use crate::handlers::{ForwardHandler, LogHandler};

/// Feeds deduplicated events from the ingestion pipeline into the
/// dispatch engine.
pub struct EngineConsumer {
    engine: Arc<DispatchEngine>,
}

impl EngineConsumer {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventConsumer for EngineConsumer {
    async fn consume(&self, event: IngestionEvent) {
        self.engine.dispatch(event).await;
    }
}

/// Build the manager and engine from env config plus the YAML topology.
/// Fails fast: a bad adapter config, pattern, or handler URL aborts
/// startup before anything runs.
pub async fn build(
    config: &Config,
    app: AppConfig,
) -> anyhow::Result<(Arc<IngestionManager>, Arc<DispatchEngine>)> {
    let manager = Arc::new(
        IngestionManager::new(config.ingest.clone(), config.supervisor.clone())
            .context("cannot initialize ingestion manager")?,
    );

    for spec in app.sources {
        let id = spec.id.clone();
        let adapter = make_adapter(&id, spec.kind)
            .await
            .with_context(|| format!("cannot build source '{id}'"))?;
        manager
            .register_source(adapter, spec.normalizer)
            .with_context(|| format!("cannot register source '{id}'"))?;
    }

    let registry = Arc::new(BindingRegistry::new());
    for spec in app.bindings {
        let scope = parse_scope(&spec.scope)?;
        let handler: Arc<dyn Handler> = match spec.handler {
            HandlerSpec::Forward { url } => Arc::new(
                ForwardHandler::new(&url)
                    .with_context(|| format!("invalid forward handler for '{}'", spec.pattern))?,
            ),
            HandlerSpec::Log => Arc::new(LogHandler),
        };
        registry
            .register(
                scope,
                &spec.pattern,
                spec.required_level,
                Duration::from_secs(spec.cooldown_secs),
                spec.fan_policy,
                handler,
            )
            .with_context(|| format!("invalid binding pattern '{}'", spec.pattern))?;
    }

    let engine = Arc::new(DispatchEngine::new(
        registry,
        config.dispatch.handler_concurrency,
    ));

    info!(
        sources = manager.health().len(),
        bindings = engine.registry().len(),
        "topology built"
    );
    Ok((manager, engine))
}

async fn make_adapter(id: &str, kind: SourceKind) -> anyhow::Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match kind {
        SourceKind::Webhook(config) => Arc::new(WebhookSource::new(id, config)),
        SourceKind::PolledApi(config) => Arc::new(PolledApiSource::new(id, config)?),
        SourceKind::FileWatch(config) => Arc::new(FileWatchSource::new(id, config)),
        SourceKind::Database(config) => Arc::new(DatabaseSource::new(id, config)),
        SourceKind::LogTail(config) => Arc::new(LogTailSource::new(id, config)),
        SourceKind::Stream(spec) => {
            let broker: Arc<dyn BrokerConsumer> = match spec.broker {
                BrokerSpec::Sqs(sqs) => Arc::new(SqsBroker::new(&sqs).await?),
                BrokerSpec::Memory => Arc::new(InMemoryBroker::new()),
            };
            Arc::new(StreamSource::new(id, spec.stream, broker))
        }
        SourceKind::Metric(spec) => {
            let sampler = Arc::new(HttpSampler::new(&spec.endpoint, &spec.value_path)?);
            Arc::new(MetricSource::new(id, spec.metric, sampler))
        }
    };
    Ok(adapter)
}
