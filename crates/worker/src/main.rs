use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use auditflow_infra::external::{HttpCallAuditor, HttpTranscriber, HttpUsageReporter, LocalAudioStorage};
use auditflow_infra::queue::{InMemoryJobQueue, JobQueue};
use auditflow_infra::store::{
    AuditResultStore, CampaignStore, InMemoryAuditResultStore, InMemoryCampaignStore, InMemoryParameterSetStore,
    ParameterSetStore, PostgresAuditResultStore, PostgresCampaignStore, PostgresParameterSetStore,
};
use auditflow_infra::worker::WorkerPoolConfig;
use auditflow_infra::{CampaignManager, JobPipeline, PipelineConfig, PipelineDeps, Reconciler, WorkerPool};

struct Stores {
    campaigns: Arc<dyn CampaignStore>,
    results: Arc<dyn AuditResultStore>,
    parameter_sets: Arc<dyn ParameterSetStore>,
    queue: Arc<dyn JobQueue>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    auditflow_observability::init();

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let stores = build_stores().await?;

    let deps = PipelineDeps {
        campaigns: stores.campaigns.clone(),
        results: stores.results,
        parameter_sets: stores.parameter_sets.clone(),
        queue: stores.queue.clone(),
        transcriber: Arc::new(HttpTranscriber::new(env_or("TRANSCRIPTION_URL", "http://localhost:8081"))),
        auditor: Arc::new(HttpCallAuditor::new(env_or("AUDIT_SCORING_URL", "http://localhost:8082"))),
        usage: Arc::new(HttpUsageReporter::new(env_or("USAGE_REPORT_URL", "http://localhost:8083"))),
        audio: Arc::new(LocalAudioStorage::new(env_or("AUDIO_STORAGE_ROOT", "/var/lib/auditflow/audio"))),
    };

    let manager = CampaignManager::new(
        stores.campaigns,
        stores.parameter_sets,
        stores.queue.clone(),
        config.max_batch_size,
    );

    let pool = if config.worker_enabled {
        let pipeline = JobPipeline::new(deps, config.retry.clone(), config.call_timeout, config.poll_interval);
        let pool_config = WorkerPoolConfig::default()
            .with_concurrency(config.concurrency)
            .with_poll_interval(config.poll_interval);
        Some(WorkerPool::new(pipeline, pool_config).spawn())
    } else {
        tracing::warn!("QUEUE_WORKER_ENABLED=false; jobs will be accepted but not processed");
        None
    };

    let reconciler = Reconciler::new(
        manager,
        stores.queue,
        config.reconcile_interval,
        config.lease_timeout,
    )
    .spawn();

    tracing::info!(
        concurrency = config.concurrency,
        max_retries = config.retry.max_retries,
        max_batch_size = config.max_batch_size,
        "auditflow worker running"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    reconciler.shutdown().await;
    if let Some(pool) = pool {
        let stats = pool.stats();
        pool.shutdown().await;
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retried = stats.retried,
            "worker pool stopped"
        );
    }
    Ok(())
}

async fn build_stores() -> anyhow::Result<Stores> {
    let use_persistent = env_or("USE_PERSISTENT_STORES", "false").parse::<bool>().unwrap_or(false);
    if !use_persistent {
        tracing::info!("using in-memory stores and queue");
        return Ok(in_memory_stores());
    }

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    auditflow_infra::store::migrate(&pool)
        .await
        .context("failed to apply migrations")?;

    Ok(Stores {
        campaigns: Arc::new(PostgresCampaignStore::new(pool.clone())),
        results: Arc::new(PostgresAuditResultStore::new(pool.clone())),
        parameter_sets: Arc::new(PostgresParameterSetStore::new(pool)),
        queue: build_queue().await?,
    })
}

#[cfg(feature = "redis")]
async fn build_queue() -> anyhow::Result<Arc<dyn JobQueue>> {
    let redis_url = env_or("REDIS_URL", "redis://localhost:6379");
    let queue = auditflow_infra::queue::RedisJobQueue::connect(&redis_url, None)
        .await
        .context("failed to connect to Redis")?;
    Ok(Arc::new(queue))
}

#[cfg(not(feature = "redis"))]
async fn build_queue() -> anyhow::Result<Arc<dyn JobQueue>> {
    tracing::warn!("USE_PERSISTENT_STORES=true but redis feature not enabled, using in-memory queue");
    Ok(Arc::new(InMemoryJobQueue::new()))
}

fn in_memory_stores() -> Stores {
    Stores {
        campaigns: Arc::new(InMemoryCampaignStore::new()),
        results: Arc::new(InMemoryAuditResultStore::new()),
        parameter_sets: Arc::new(InMemoryParameterSetStore::new()),
        queue: Arc::new(InMemoryJobQueue::new()),
    }
}
