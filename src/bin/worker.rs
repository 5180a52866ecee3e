use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flowhost::config::WorkerConfig;
use flowhost::logbuf::{BufferLayer, LogBuffer};
use flowhost::worker::api::{router, WorkerState};
use flowhost::worker::engine::ProcessEngine;
use flowhost::worker::queue::ExecutionQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let logs = LogBuffer::default();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(BufferLayer::new(logs.clone()))
        .init();

    let config = WorkerConfig::parse();
    let port = config.port;
    tracing::info!(
        artifact_id = %config.artifact_id,
        port,
        "Worker starting"
    );

    let engine = Arc::new(ProcessEngine::new(
        config.engine_cmd.clone(),
        config.engine_timeout(),
    ));
    let queue = ExecutionQueue::start(engine, &config);
    let app = router(WorkerState::new(queue, config, logs));

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Worker API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
