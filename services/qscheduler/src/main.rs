//! Quota scheduler service.
//!
//! Serves the pool administration API and the executor entry points
//! (assign-tasks, notify-tasks, cancellations), and keeps pool balances
//! current in the background.

use std::sync::Arc;

use anyhow::{Context, Result};
use qs_service::{
    api, config,
    scheduler::BalanceWorker,
    state::AppState,
    store::{FilePoolStore, MemoryPoolStore, PoolStore},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to QS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting quota scheduler");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let store: Arc<dyn PoolStore> = match &config.state_dir {
        Some(dir) => {
            let store = FilePoolStore::open(dir)
                .await
                .with_context(|| format!("failed to open state dir {}", dir.display()))?;
            info!(state_dir = %dir.display(), "Using file pool store");
            Arc::new(store)
        }
        None => {
            warn!("QS_STATE_DIR not set; pools are kept in memory only");
            Arc::new(MemoryPoolStore::new())
        }
    };

    let state = AppState::new(store);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let balance_worker = BalanceWorker::new(state.clone(), config.balance_interval);
    let balance_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            balance_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, balance_handle).await {
        warn!(error = %e, "Balance worker did not shut down in time");
    }

    info!("Quota scheduler shutdown complete");
    Ok(())
}
