//! HTTP surface shared by both binaries.
//!
//! - Admin routes: verification listing, code submission, cancellation and
//!   the notification sink. Served by the worker and by the admin process.
//! - Posting routes: only where the process owns the browser.
//!
//! Mutating admin routes require `X-Admin-Token` when a token is configured.

pub mod handlers;
pub mod notifications;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{ActionResponse, AppState, HealthResponse, ADMIN_TOKEN_HEADER};
pub use notifications::{NotificationLog, StoredNotification};
pub use signature::{is_signing_enabled, sign_payload, verify_signature};

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/admin/verifications", get(handlers::list_verifications))
        .route("/api/admin/verifications/:id", get(handlers::get_verification))
        .route("/admin/verification/:id", get(handlers::get_verification))
        .route(
            "/api/admin/verifications/:id/code",
            post(handlers::submit_code),
        )
        .route(
            "/api/admin/verifications/:id/cancel",
            post(handlers::cancel_verification),
        )
        .route(
            "/api/admin/notifications",
            get(handlers::list_notifications).post(handlers::receive_notification),
        )
}

/// Routes for the registry-only admin process.
pub fn admin_router(state: AppState) -> Router {
    admin_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Admin routes plus tweet submission, for the process owning the browser.
pub fn worker_router(state: AppState) -> Router {
    admin_routes()
        .route("/api/tweets", post(handlers::submit_tweet))
        .route("/api/tweets/status", get(handlers::tweet_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
