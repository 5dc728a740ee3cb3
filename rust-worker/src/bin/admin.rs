//! twitter-admin - verification admin process.
//!
//! Serves the admin routes against the shared verification file. It owns no
//! browser: codes submitted here are picked up by the worker process holding
//! the challenged session, and this process waits for the outcome.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use twitterd::auth::ChallengeScreen;
use twitterd::browser::{Pacing, Selectors};
use twitterd::web::admin_router;
use twitterd::{AppState, Config, VerificationRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("admin_server_starting");

    let config = Arc::new(Config::from_env());
    info!(
        port = config.port,
        store = %config.verification_store_path.display(),
        admin_token_configured = config.admin_api_token.is_some(),
        notification_signing_configured = config.notification_signing_key.is_some(),
        "config_loaded"
    );

    let selectors = Arc::new(Selectors::load(config.selectors_file.as_deref()));
    let registry = Arc::new(
        VerificationRegistry::open(
            &config.verification_store_path,
            ChallengeScreen::new(selectors, Pacing::default()),
        )
        .with_horizon(config.verification_horizon()),
    );

    let app = admin_router(AppState::for_admin(Arc::clone(&config), registry));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "admin_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("admin_server_shutdown_complete");

    Ok(())
}

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

    info!("admin_server_shutting_down");
}
