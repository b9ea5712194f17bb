use anyhow::Context;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::settings::{AppConfig, QueueBackend};
use crate::infrastructure::db::pool::{connect_to_db, run_migrations};
use crate::infrastructure::queue::{InMemoryQueue, JobQueue, RedisJobQueue};
use crate::infrastructure::redis::client::RedisService;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::video::repository::VideoRepository;
use crate::state::AppState;
use crate::workers::executor::ScriptExecutor;
use crate::workers::transcoder::TranscodeWorker;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
#[cfg(test)]
mod testing;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("invalid configuration")?;

    let db = connect_to_db(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    run_migrations(&db).await.context("failed to run migrations")?;
    let videos = Arc::new(VideoRepository::new(db));

    let storage = Arc::new(StorageService::new(&config.storage).await);

    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required for the redis queue backend")?;
            let redis = RedisService::new(url).await.context("failed to connect to Redis")?;
            Arc::new(RedisJobQueue::new(redis, config.queue.name.clone()))
        }
        QueueBackend::Memory => {
            warn!("Using the in-memory queue; queued jobs will not survive a restart");
            Arc::new(InMemoryQueue::new())
        }
    };

    let worker = if config.worker.enabled {
        let worker = TranscodeWorker::new(
            config.worker.clone(),
            config.storage.clone(),
            queue.clone(),
            videos.clone(),
            storage.clone(),
            Arc::new(ScriptExecutor::from_settings(&config.worker)),
        );
        Some(worker.start())
    } else {
        info!("Transcoder worker disabled");
        None
    };

    let state = AppState::new(config.clone(), videos, storage, queue);
    let app = app::create_app(state).await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        worker.stop().await;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
