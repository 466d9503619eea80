use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parallax_api::config::ServerConfig;
use parallax_api::router::build_app_router;
use parallax_api::state::AppState;
use parallax_db::{create_pool, PgCheckpointStore, PgDeadLetterStore, PgJobStore};
use parallax_events::{EventBus, NotificationDispatcher};
use parallax_pipeline::Orchestrator;
use parallax_queue::{LeaseReaper, TaskQueue};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parallax_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Orchestrator (Postgres when configured, in-memory otherwise) ---
    let (orchestrator, pool) = match std::env::var("DATABASE_URL").ok() {
        Some(url) => {
            let pg = create_pool(&url)
                .await
                .expect("Failed to connect to database");
            parallax_db::health_check(&pg)
                .await
                .expect("Database health check failed");
            tracing::info!("Database pool ready, health check passed");
            let orchestrator = Arc::new(Orchestrator::new(
                Arc::new(PgJobStore::new(pg.clone())),
                Arc::new(PgCheckpointStore::new(pg.clone())),
                Arc::new(PgDeadLetterStore::new(pg.clone())),
                Arc::new(TaskQueue::new()),
                Arc::new(EventBus::default()),
            ));
            (orchestrator, Some(pg))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            (Arc::new(Orchestrator::in_memory()), None)
        }
    };

    // --- Background services ---
    let background = CancellationToken::new();
    tokio::spawn(LeaseReaper::new(orchestrator.queue().clone()).run(background.clone()));
    if let Ok(url) = std::env::var("WEBHOOK_URL") {
        tokio::spawn(
            NotificationDispatcher::new(orchestrator.bus().clone(), url).run(background.clone()),
        );
        tracing::info!("Notification dispatcher started");
    }

    // --- App state and router ---
    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
        pool,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    background.cancel();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
