//! Best-effort alerts to the admin notification endpoint.
//!
//! A failed notification is logged and otherwise ignored; alerting must never
//! hold up or break the posting pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::web::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of a notification post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "info".to_string()
}

/// Sink for operator alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an urgent alert. Returns whether it was accepted.
    async fn urgent(&self, message: &str) -> bool;
}

/// Posts alerts to `{admin_base_url}/api/admin/notifications`.
#[derive(Clone)]
pub struct AdminNotifier {
    client: Client,
    endpoint: String,
    signing_key: Option<String>,
    attempts: u32,
    retry_delay: Duration,
}

impl AdminNotifier {
    pub fn new(admin_base_url: &str, signing_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: format!(
                "{}/api/admin/notifications",
                admin_base_url.trim_end_matches('/')
            ),
            signing_key: signing_key.filter(|k| !k.trim().is_empty()),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.admin_base_url, config.notification_signing_key.clone())
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, body: &[u8]) -> Result<StatusCode, reqwest::Error> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        if let Some(key) = &self.signing_key {
            let timestamp = signature::unix_now().to_string();
            if let Some(sig) = signature::sign_payload(key, &timestamp, body) {
                request = request
                    .header(TIMESTAMP_HEADER, timestamp)
                    .header(SIGNATURE_HEADER, sig);
            }
        }

        request.send().await.map(|resp| resp.status())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Notifier for AdminNotifier {
    async fn urgent(&self, message: &str) -> bool {
        let payload = Notification {
            message: message.to_string(),
            kind: "urgent".to_string(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "notification_encode_failed");
                return false;
            }
        };

        for attempt in 1..=self.attempts {
            match self.send_once(&body).await {
                Ok(status) if status.is_success() => {
                    info!(attempt = attempt, status_code = status.as_u16(), "notification_sent");
                    return true;
                }
                Ok(status) if is_retryable(status) => {
                    warn!(attempt = attempt, status_code = status.as_u16(), "notification_retryable_status");
                }
                Ok(status) => {
                    error!(status_code = status.as_u16(), "notification_rejected");
                    return false;
                }
                Err(e) if e.is_timeout() => {
                    warn!(attempt = attempt, error = %e, "notification_timeout");
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "notification_request_error");
                }
            }

            if attempt < self.attempts {
                sleep(self.retry_delay * attempt).await;
            }
        }

        error!(attempts = self.attempts, endpoint = %self.endpoint, "notification_failed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;

    #[derive(Clone, Default)]
    struct Sink {
        hits: Arc<AtomicUsize>,
        fail_first: usize,
        fail_with: u16,
        seen: Arc<Mutex<Vec<(HeaderMap, String)>>>,
    }

    async fn receive(State(sink): State<Sink>, headers: HeaderMap, body: String) -> StatusCode {
        let n = sink.hits.fetch_add(1, Ordering::SeqCst);
        sink.seen.lock().unwrap().push((headers, body));
        if n < sink.fail_first {
            StatusCode::from_u16(sink.fail_with).unwrap()
        } else {
            StatusCode::OK
        }
    }

    async fn serve(sink: Sink) -> String {
        let app = Router::new()
            .route("/api/admin/notifications", post(receive))
            .with_state(sink);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let n = AdminNotifier::new("http://admin.local/", None);
        assert_eq!(n.endpoint(), "http://admin.local/api/admin/notifications");
    }

    #[test]
    fn test_notification_kind_defaults() {
        let n: Notification = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(n.kind, "info");
    }

    #[tokio::test]
    async fn test_urgent_posts_json() {
        let sink = Sink::default();
        let base = serve(sink.clone()).await;

        let notifier = AdminNotifier::new(&base, None);
        assert!(notifier.urgent("Verification required").await);

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let body: Notification = serde_json::from_str(&seen[0].1).unwrap();
        assert_eq!(body.message, "Verification required");
        assert_eq!(body.kind, "urgent");
        assert!(seen[0].0.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_urgent_retries_server_errors() {
        let sink = Sink {
            fail_first: 2,
            fail_with: 503,
            ..Sink::default()
        };
        let base = serve(sink.clone()).await;

        let notifier = AdminNotifier::new(&base, None).with_retry(3, Duration::from_millis(5));
        assert!(notifier.urgent("retry me").await);
        assert_eq!(sink.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_urgent_does_not_retry_client_errors() {
        let sink = Sink {
            fail_first: 5,
            fail_with: 400,
            ..Sink::default()
        };
        let base = serve(sink.clone()).await;

        let notifier = AdminNotifier::new(&base, None).with_retry(3, Duration::from_millis(5));
        assert!(!notifier.urgent("bad").await);
        assert_eq!(sink.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_urgent_signs_when_key_set() {
        let sink = Sink::default();
        let base = serve(sink.clone()).await;

        let notifier = AdminNotifier::new(&base, Some("k3y".to_string()));
        assert!(notifier.urgent("signed").await);

        let seen = sink.seen.lock().unwrap();
        let headers = &seen[0].0;
        let ts = headers.get(TIMESTAMP_HEADER).unwrap().to_str().unwrap();
        let sig = headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert!(signature::verify_signature("k3y", ts, seen[0].1.as_bytes(), sig, 300));
    }

    #[tokio::test]
    async fn test_urgent_unreachable_returns_false() {
        let notifier =
            AdminNotifier::new("http://127.0.0.1:1", None).with_retry(2, Duration::from_millis(1));
        assert!(!notifier.urgent("nobody home").await);
    }
}
