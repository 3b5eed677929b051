use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use audsync_core::Cabinet;
use audsync_engine::{
    AdapterRegistry, ChunkAggregator, ConfirmationScheduler, ConnectionGuardian,
    NotImplementedAdapter, ResultPublisher, SyncOrchestrator, SyncWorker, TwoPhaseAdapter,
};
use audsync_infra::{
    ContactExport, PgConnector, RedisStreamsBus, WorkerConfig, YandexAudienceClient,
};

fn main() -> anyhow::Result<()> {
    audsync_observability::init();

    let config = WorkerConfig::from_env().context("invalid configuration")?;
    let guardian = ConnectionGuardian::new(config.reconnect_delay);

    let datastore = PgConnector::new(config.database_url.expose(), config.db_max_connections)
        .context("failed to start datastore runtime")?;
    let resolver = guardian.acquire(&datastore);

    let mut adapters = AdapterRegistry::new();
    adapters
        .register(NotImplementedAdapter::new(Cabinet::Facebook))
        .register(NotImplementedAdapter::new(Cabinet::Google));

    match &config.yandex_oauth_token {
        Some(token) => {
            let export = ContactExport::new()
                .with_defaults(config.default_country.clone(), config.default_city.clone());
            let client = YandexAudienceClient::new(&config.yandex_api_url, token.expose(), export)
                .context("invalid Yandex Audience settings")?;
            adapters.register(
                TwoPhaseAdapter::new(Cabinet::Yandex, client).with_confirm_delay(config.confirm_delay),
            );
        }
        None => warn!("YANDEX_OAUTH_TOKEN is not set; yandex integrations will be skipped"),
    }
    let cabinets = adapters.cabinets();

    let scheduler = ConfirmationScheduler::new();
    let timer = scheduler
        .spawn("confirm-scheduler")
        .context("failed to start confirmation scheduler")?;

    let jobs = RedisStreamsBus::new(config.redis_url.expose(), &config.jobs_stream)?
        .with_consumer(&config.consumer_group, &config.consumer_name)
        .with_guardian(guardian);
    let status = RedisStreamsBus::new(config.redis_url.expose(), &config.status_stream)?;

    let orchestrator = SyncOrchestrator::new(resolver, adapters, scheduler.clone());
    let worker = SyncWorker::new(
        Arc::new(ChunkAggregator::new()),
        orchestrator,
        ResultPublisher::new(status),
    )
    .with_buffer_ttl(config.chunk_buffer_ttl)
    .spawn("sync-worker", &jobs)
    .context("failed to start sync worker")?;

    info!(
        jobs_stream = %config.jobs_stream,
        status_stream = %config.status_stream,
        consumer_group = %config.consumer_group,
        consumer_name = %config.consumer_name,
        cabinets = ?cabinets,
        "audsync worker started"
    );

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;
    signals
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested");
    worker.shutdown();
    timer.shutdown();
    info!(stats = ?scheduler.stats(), "audsync worker stopped");

    Ok(())
}
