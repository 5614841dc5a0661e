//! # Proxy Pool Server
//!
//! HTTP front end of the market-aware proxy pool. One binary hosts:
//!
//! - the REST/RPC surface under the configured prefix (default `/api/v1`);
//! - the market scheduler, which starts and stops live pools around each
//!   market's trading hours;
//! - the health monitor, which raises alerts on degraded pools.
//!
//! Ctrl-C or SIGTERM stops the HTTP server, cancels the background loops and then
//! stops every running pool.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_proxypool::loggers::setup_logging;

mod proxypool_logic;
use proxypool_logic::{config, router, state};

const APP_NAME: &str = "server_proxypool";

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();

    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    // Dropping the guard flushes the file writer, so it lives until main returns.
    let _log_guard = setup_logging(&log_dir, &log_level, APP_NAME)?;

    let prefix = config.normalized_prefix();
    info!(
        port = config.port,
        prefix = %prefix,
        markets = config.markets.as_deref().unwrap_or(""),
        scheduler_enabled = config.scheduler_enabled,
        "configuration resolved"
    );

    let state = state::AppState::from_config(&config).await?;
    let app = router::build_router(state.clone(), &prefix);

    let addr = format!(
        "{}:{}",
        config.host.as_deref().unwrap_or("0.0.0.0"),
        config.port.unwrap_or(8080)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "{APP_NAME} listening");

    let shutdown = Shutdown::default();
    let cancel = CancellationToken::new();

    if config.scheduler_enabled.unwrap_or(true) {
        let every = Duration::from_secs(config.scheduler_interval_seconds.unwrap_or(60).max(1));
        shutdown.spawn_task(state.scheduler.clone().run(every, cancel.clone()));
    } else {
        warn!("market scheduler disabled, pools start and stop only on request");
    }
    let every = Duration::from_secs(config.monitor_interval_seconds.unwrap_or(60).max(1));
    shutdown.spawn_task(state.monitor.clone().run(every, cancel.clone()));

    let loops = cancel.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            guard.cancelled().await;
            info!("signal received: stopping http server and background loops");
            loops.cancel();
        });
        if let Err(e) = server.await {
            error!(error = %e, "http server failed");
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => info!("shutdown: gracefully {}s after shutdown signal received", elapsed.as_secs_f64()),
        Err(e) => warn!("shutdown: forcefully due to timeout: {}", e),
    }
    // Covers the forced path, where the token was never reached.
    cancel.cancel();

    for (market, mode, stats) in state.manager.stop_all().await {
        info!(
            market = %market,
            mode = %mode,
            requests = stats.total_requests_served,
            rotations = stats.total_rotations,
            "pool stopped on shutdown"
        );
    }

    info!("Bye!");
    Ok(())
}
