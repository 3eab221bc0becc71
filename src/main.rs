use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use text_jobs::queue::{self, Worker, WorkerSettings};
use text_jobs::{config::Config, routes::create_router, storage, utils::init_logger, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    // External clients; failing to build either is fatal
    let queue = queue::connect(&config.queue)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create queue client: {}", e))?;
    let store = storage::connect(&config.storage)
        .map_err(|e| anyhow::anyhow!("Failed to create storage client: {}", e))?;
    info!(queue = queue.backend(), storage = store.backend(), "Clients initialized");

    let state = AppState::new(queue.clone(), store.clone());
    let shutdown = CancellationToken::new();

    // Start worker loop if enabled
    let worker_settings = WorkerSettings::from(&config.worker);
    let worker_handle = if config.worker.enabled {
        let worker = Worker::new(queue, store, worker_settings.clone());
        let token = shutdown.clone();
        info!("Worker enabled, starting background processing");
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        None
    };

    let app = create_router(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HOST {}: {}", config.server.host, e))?;
    let addr = SocketAddr::from((host, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        // A receive in progress is allowed to finish.
        let grace = worker_settings.wait_time + worker_settings.error_backoff + Duration::from_secs(5);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => info!("Worker shut down cleanly"),
            Ok(Err(e)) => warn!(error = %e, "Worker task failed"),
            Err(_) => warn!("Worker did not stop in time; in-flight message will be redelivered"),
        }
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }
    info!("Shutdown requested");
}
