use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parallax_core::stage::ResourceClass;
use parallax_db::{create_pool, PgCheckpointStore, PgDeadLetterStore, PgJobStore};
use parallax_events::{EventBus, NotificationDispatcher};
use parallax_pipeline::Orchestrator;
use parallax_queue::{LeaseReaper, TaskQueue};
use parallax_worker::{Autoscaler, SimulatedExecutor, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parallax_worker=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        cpu_workers = config.cpu_workers,
        gpu_workers = config.gpu_workers,
        "Worker node starting"
    );

    let orchestrator = match &config.database_url {
        Some(url) => {
            let pg = create_pool(url)
                .await
                .expect("Failed to connect to Postgres");
            Arc::new(Orchestrator::new(
                Arc::new(PgJobStore::new(pg.clone())),
                Arc::new(PgCheckpointStore::new(pg.clone())),
                Arc::new(PgDeadLetterStore::new(pg)),
                Arc::new(TaskQueue::new()),
                Arc::new(EventBus::default()),
            ))
        }
        None => Arc::new(Orchestrator::in_memory()),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(LeaseReaper::new(orchestrator.queue().clone()).run(shutdown.clone()));
    if let Some(url) = config.webhook_url.clone() {
        tokio::spawn(
            NotificationDispatcher::new(orchestrator.bus().clone(), url).run(shutdown.clone()),
        );
    }

    // Stage implementations plug in here; the simulated executor stands in
    // until the CV/ML stages land.
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_secs(2)));
    let pool = Arc::new(
        WorkerPool::new(orchestrator.clone(), executor)
            .with_preemptible_fraction(config.preemptible_fraction)
            .with_lease_duration(config.lease_duration())
            .with_poll_interval(config.poll_interval()),
    );
    pool.scale_to(ResourceClass::Cpu, config.cpu_workers).await;
    pool.scale_to(ResourceClass::Gpu, config.gpu_workers).await;

    tokio::spawn(
        Autoscaler::new(pool.clone(), orchestrator.queue().clone())
            .with_interval(config.autoscale_interval())
            .run(shutdown.clone()),
    );

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    pool.shutdown().await;
}
