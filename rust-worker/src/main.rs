//! twitter-worker - owns the browser session and drains the tweet queue.
//!
//! Starts the posting service, prunes old verification records every hour and
//! serves the admin and posting API until SIGINT/SIGTERM, then closes the
//! service so queued tweets are drained and the browser is shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use twitterd::browser::CdpLauncher;
use twitterd::web::worker_router;
use twitterd::{AdminNotifier, AppState, Config, TwitterService};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const CLEANUP_MAX_AGE_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    let config = Arc::new(Config::from_env());
    info!(
        username = %config.credentials.username,
        proxy_configured = config.proxy_url.is_some(),
        headless = config.headless,
        port = config.port,
        verification_timeout_minutes = config.verification_timeout_minutes,
        admin_token_configured = config.admin_api_token.is_some(),
        "config_loaded"
    );

    let service = TwitterService::new(
        Arc::clone(&config),
        Arc::new(CdpLauncher),
        Arc::new(AdminNotifier::from_config(&config)),
    );

    if !service.initialize(config.proxy_url.clone()).await {
        warn!("initial_initialize_failed_will_retry_on_submit");
    }

    let cleanup = {
        let registry = Arc::clone(service.registry());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = registry.cleanup_old(CLEANUP_MAX_AGE_HOURS);
                if removed > 0 {
                    info!(removed = removed, "verification_cleanup_completed");
                }
            }
        })
    };

    let app = worker_router(AppState::for_worker(Arc::clone(&config), Arc::clone(&service)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    cleanup.abort();
    service.close().await;

    info!("worker_shutdown_complete");

    served
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("worker_shutting_down");
}
