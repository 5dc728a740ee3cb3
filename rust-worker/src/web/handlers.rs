//! HTTP handlers for the admin and posting endpoints.
//!
//! Handlers never fail loudly: problems become `{success: false, error}` with
//! an HTTP error status.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::notifications::{NotificationLog, StoredNotification};
use super::signature::{
    constant_time_compare, is_signing_enabled, verify_signature, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use crate::config::Config;
use crate::notify::Notification;
use crate::queue::Priority;
use crate::service::{ServiceStatus, TwitterService};
use crate::verification::{PendingView, VerificationRegistry};

/// Header carrying the admin shared secret.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<VerificationRegistry>,
    pub notifications: Arc<NotificationLog>,
    /// Present only in the process that owns the browser.
    pub service: Option<Arc<TwitterService>>,
}

impl AppState {
    /// State for the process that owns the browser.
    pub fn for_worker(config: Arc<Config>, service: Arc<TwitterService>) -> Self {
        Self {
            config,
            registry: Arc::clone(service.registry()),
            notifications: Arc::new(NotificationLog::default()),
            service: Some(service),
        }
    }

    /// State for a registry-only admin process.
    pub fn for_admin(config: Arc<Config>, registry: Arc<VerificationRegistry>) -> Self {
        Self {
            config,
            registry,
            notifications: Arc::new(NotificationLog::default()),
            service: None,
        }
    }
}

/// Outcome of a mutating call.
#[derive(Debug, Serialize, PartialEq)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ActionResponse>)>;

fn ok() -> (StatusCode, Json<ActionResponse>) {
    (
        StatusCode::OK,
        Json(ActionResponse {
            success: true,
            error: None,
        }),
    )
}

fn failure(status: StatusCode, error: &str) -> (StatusCode, Json<ActionResponse>) {
    (
        status,
        Json(ActionResponse {
            success: false,
            error: Some(error.to_string()),
        }),
    )
}

/// Reject the call unless it carries the admin token, when one is configured.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ActionResponse>)> {
    let Some(expected) = config.admin_api_token.as_deref() else {
        return Ok(());
    };

    match headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(provided) if constant_time_compare(provided, expected) => Ok(()),
        Some(_) => {
            warn!("admin_token_invalid");
            Err(failure(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
        None => {
            warn!("admin_token_missing");
            Err(failure(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Verifications
// =============================================================================

pub async fn list_verifications(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, PendingView>> {
    Json(state.registry.list_pending())
}

pub async fn get_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PendingView> {
    state
        .registry
        .get(&id)
        .map(|record| Json(PendingView::from(&record)))
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "verification not found"))
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Apply an operator's code. Waits until the browser has tried it.
pub async fn submit_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    if let Err(rejection) = authorize(&state.config, &headers) {
        return rejection;
    }

    let Some(record) = state.registry.get(&id) else {
        return failure(StatusCode::NOT_FOUND, "verification not found");
    };
    if !record.status.accepts_code() {
        return failure(
            StatusCode::CONFLICT,
            &format!("verification is {}", record.status),
        );
    }
    if request.code.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "code is required");
    }

    info!(verification_id = %id, "verification_code_received");

    if state.registry.submit_code(&id, &request.code).await {
        ok()
    } else {
        failure(StatusCode::UNPROCESSABLE_ENTITY, "code was not accepted")
    }
}

pub async fn cancel_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<ActionResponse>) {
    if let Err(rejection) = authorize(&state.config, &headers) {
        return rejection;
    }

    match state.registry.status(&id) {
        None => failure(StatusCode::NOT_FOUND, "verification not found"),
        Some(_) if state.registry.cancel(&id) => {
            info!(verification_id = %id, "verification_cancelled_by_operator");
            ok()
        }
        Some(status) => failure(StatusCode::CONFLICT, &format!("verification is {}", status)),
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Accept an alert. When a signing key is configured the body must carry a
/// fresh HMAC signature.
pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ActionResponse>) {
    if is_signing_enabled(&state.config.notification_signing_key) {
        let key = state
            .config
            .notification_signing_key
            .as_deref()
            .unwrap_or_default();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        if !verify_signature(
            key,
            &header(TIMESTAMP_HEADER),
            &body,
            &header(SIGNATURE_HEADER),
            state.config.notification_signature_max_age,
        ) {
            warn!("notification_signature_invalid");
            return failure(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let notification: Notification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, "notification_body_invalid");
            return failure(StatusCode::BAD_REQUEST, "invalid notification body");
        }
    };

    info!(kind = %notification.kind, message = %notification.message, "notification_received");
    state.notifications.push(notification);
    ok()
}

pub async fn list_notifications(State(state): State<AppState>) -> Json<Vec<StoredNotification>> {
    Json(state.notifications.recent())
}

// =============================================================================
// Tweets
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TweetRequest {
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

fn default_source() -> String {
    "web".to_string()
}

/// Submit a tweet or reply. Priority 0 answers once the post went out.
pub async fn submit_tweet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TweetRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    if let Err(rejection) = authorize(&state.config, &headers) {
        return rejection;
    }
    let Some(service) = &state.service else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "posting is not available here");
    };
    if request.content.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "content is required");
    }

    let accepted = match &request.reply_to {
        Some(tweet_id) => {
            service
                .submit_reply(tweet_id, &request.content, request.priority, &request.source)
                .await
        }
        None => {
            service
                .submit(&request.content, request.priority, &request.source)
                .await
        }
    };

    match (accepted, request.priority.is_immediate()) {
        (true, _) => ok(),
        (false, true) => failure(StatusCode::BAD_GATEWAY, "tweet could not be posted"),
        (false, false) => failure(StatusCode::SERVICE_UNAVAILABLE, "tweet could not be queued"),
    }
}

pub async fn tweet_status(State(state): State<AppState>) -> ApiResult<ServiceStatus> {
    state
        .service
        .as_ref()
        .map(|service| Json(service.status()))
        .ok_or_else(|| failure(StatusCode::SERVICE_UNAVAILABLE, "posting is not available here"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ChallengeScreen;
    use crate::browser::{Pacing, Selectors};
    use crate::verification::VerificationStatus;
    use crate::web::signature::{sign_payload, unix_now};

    fn admin_state(dir: &tempfile::TempDir, token: Option<&str>) -> AppState {
        let config = Config {
            admin_api_token: token.map(str::to_string),
            notification_signing_key: Some("sekrit".to_string()),
            ..Config::default()
        };
        let registry = VerificationRegistry::open(
            dir.path().join("verifications.json"),
            ChallengeScreen::new(Arc::new(Selectors::default()), Pacing::immediate()),
        );
        AppState::for_admin(Arc::new(config), Arc::new(registry))
    }

    fn token_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, token.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_list_and_get_verification() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, None);
        state
            .registry
            .register("verify_1", Some("static/screenshots/v.png".into()), None);

        let Json(listing) = list_verifications(State(state.clone())).await;
        assert_eq!(listing.len(), 1);
        assert_eq!(
            listing["verify_1"].screenshot.as_deref(),
            Some("static/screenshots/v.png")
        );

        let view = get_verification(State(state.clone()), Path("verify_1".into()))
            .await
            .unwrap();
        assert_eq!(view.0.status, VerificationStatus::Pending);

        let (status, _) = get_verification(State(state), Path("verify_2".into()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, Some("letmein"));
        state.registry.register("verify_1", None, None);

        let (status, Json(body)) =
            cancel_verification(State(state.clone()), Path("verify_1".into()), HeaderMap::new())
                .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!body.success);

        let (status, _) = cancel_verification(
            State(state.clone()),
            Path("verify_1".into()),
            token_headers("letmein"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.registry.status("verify_1"),
            Some(VerificationStatus::Cancelled)
        );

        let (status, _) = cancel_verification(
            State(state),
            Path("verify_1".into()),
            token_headers("letmein"),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_submit_code_rejects_unknown_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, None);
        state.registry.register("verify_1", None, None);
        state.registry.complete("verify_1");

        let request = || Json(CodeRequest { code: "123456".into() });

        let (status, _) = submit_code(
            State(state.clone()),
            Path("missing".into()),
            HeaderMap::new(),
            request(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, Json(body)) =
            submit_code(State(state), Path("verify_1".into()), HeaderMap::new(), request()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error.as_deref(), Some("verification is completed"));
    }

    #[tokio::test]
    async fn test_signed_notification_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, None);
        let body = br#"{"message":"URGENT: code needed","type":"urgent"}"#;
        let timestamp = unix_now().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            sign_payload("sekrit", &timestamp, body).unwrap().parse().unwrap(),
        );

        let (status, _) = receive_notification(
            State(state.clone()),
            headers,
            Bytes::from_static(body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let Json(recent) = list_notifications(State(state)).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, "urgent");
    }

    #[tokio::test]
    async fn test_unsigned_notification_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, None);

        let (status, Json(body)) = receive_notification(
            State(state.clone()),
            HeaderMap::new(),
            Bytes::from_static(br#"{"message":"hi"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error.as_deref(), Some("invalid signature"));
        assert!(state.notifications.recent().is_empty());
    }

    #[tokio::test]
    async fn test_tweets_unavailable_without_service() {
        let dir = tempfile::tempdir().unwrap();
        let state = admin_state(&dir, None);
        let request = TweetRequest {
            content: "gm".into(),
            priority: Priority::NORMAL,
            source: "web".into(),
            reply_to: None,
        };

        let (status, _) = submit_tweet(State(state.clone()), HeaderMap::new(), Json(request)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(tweet_status(State(state)).await.is_err());
    }

    #[test]
    fn test_tweet_request_defaults() {
        let request: TweetRequest = serde_json::from_str(r#"{"content":"gm"}"#).unwrap();
        assert_eq!(request.priority, Priority::NORMAL);
        assert_eq!(request.source, "web");
        assert!(request.reply_to.is_none());
    }
}
