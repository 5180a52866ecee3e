use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowhost::config::ManagerConfig;
use flowhost::manager::api::{router, ManagerState};
use flowhost::manager::lifecycle::ContainerManager;
use flowhost::runtime::{connect_docker, ContainerRuntime, DockerRuntime, UnavailableRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ManagerConfig::parse();
    let listen_port = config.listen_port;

    // A missing daemon should not take the API down with it; container
    // operations surface the failure per request instead.
    let runtime: Arc<dyn ContainerRuntime> = match connect_docker().await {
        Ok(docker) => Arc::new(DockerRuntime::new(docker)),
        Err(e) => {
            tracing::error!(error = %e, "Docker unavailable, container operations will fail");
            Arc::new(UnavailableRuntime::new(e.to_string()))
        }
    };

    let manager = Arc::new(ContainerManager::new(config, runtime));
    let state = ManagerState::new(Arc::clone(&manager));
    let app = router(state);

    let addr = format!("0.0.0.0:{}", listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Manager API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    manager.shutdown_all().await;
    Ok(())
}
