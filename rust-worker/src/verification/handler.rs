//! The wait performed when a challenge screen blocks the session.
//!
//! The screen is photographed, a record is registered and an operator is
//! alerted. The flow then polls until the challenge is answered, cancelled or
//! the timeout passes. The caller holds the browser lease the whole time, so
//! the record is registered without a browser handle: a code submitted from
//! the admin side is handed to this wait, which types it itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::record::VerificationStatus;
use super::registry::VerificationRegistry;
use super::watch::ResolutionWatch;
use crate::auth::ChallengeScreen;
use crate::browser::BrowserHandle;
use crate::notify::Notifier;

/// How a challenge wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// No challenge was showing
    NotPresent,
    Resolved { id: String },
    TimedOut { id: String },
    Cancelled { id: String },
}

impl ChallengeOutcome {
    /// Whether the session may carry on with what it was doing.
    pub fn may_proceed(&self) -> bool {
        matches!(self, ChallengeOutcome::NotPresent | ChallengeOutcome::Resolved { .. })
    }
}

pub struct ChallengeHandler {
    registry: Arc<VerificationRegistry>,
    notifier: Arc<dyn Notifier>,
    watch: Arc<dyn ResolutionWatch>,
    challenge: ChallengeScreen,
    screenshot_dir: PathBuf,
    admin_base_url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl ChallengeHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<VerificationRegistry>,
        notifier: Arc<dyn Notifier>,
        watch: Arc<dyn ResolutionWatch>,
        challenge: ChallengeScreen,
        screenshot_dir: PathBuf,
        admin_base_url: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            watch,
            challenge,
            screenshot_dir,
            admin_base_url: admin_base_url.trim_end_matches('/').to_string(),
            timeout,
            poll_interval,
        }
    }

    pub fn challenge(&self) -> &ChallengeScreen {
        &self.challenge
    }

    /// Admin panel link for one verification.
    pub fn admin_link(&self, id: &str) -> String {
        format!("{}/admin/verification/{}", self.admin_base_url, id)
    }

    /// Detect a challenge and, if one is showing, wait for its resolution.
    pub async fn handle(&self, browser: &dyn BrowserHandle) -> ChallengeOutcome {
        if !self.challenge.is_present(browser).await {
            return ChallengeOutcome::NotPresent;
        }

        warn!("verification_required");

        let screenshot = self.capture(browser).await;
        let id = self.registry.new_id();
        self.registry.register(&id, screenshot, None);

        let message = format!(
            "URGENT: Twitter verification code required. Access verification panel at: {}",
            self.admin_link(&id)
        );
        if !self.notifier.urgent(&message).await {
            warn!(verification_id = %id, "verification_alert_not_delivered");
        }

        self.wait(&id, browser).await
    }

    async fn wait(&self, id: &str, browser: &dyn BrowserHandle) -> ChallengeOutcome {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut reminded_minutes = 0u64;
        let mut state = self.registry.status(id);

        info!(
            verification_id = %id,
            timeout_minutes = self.timeout.as_secs() / 60,
            "verification_wait_started"
        );

        loop {
            match state {
                Some(VerificationStatus::Completed) => {
                    info!(verification_id = %id, "verification_resolved_by_operator");
                    return ChallengeOutcome::Resolved { id: id.to_string() };
                }
                Some(VerificationStatus::Cancelled) => {
                    info!(verification_id = %id, "verification_cancelled");
                    return ChallengeOutcome::Cancelled { id: id.to_string() };
                }
                Some(VerificationStatus::Processing) => {
                    // Submitted codes are ours to apply; one still being
                    // handed over is picked up on the next poll.
                    if let Some(code) = self.registry.claim_submitted_code(id) {
                        let accepted = self.challenge.submit_code(browser, &code).await;
                        self.registry.finish(id, accepted);
                        if accepted {
                            return ChallengeOutcome::Resolved { id: id.to_string() };
                        }
                    }
                }
                Some(VerificationStatus::Pending) | Some(VerificationStatus::Failed) | None => {
                    if !self.challenge.is_present(browser).await {
                        info!(verification_id = %id, "verification_screen_cleared");
                        self.registry.complete(id);
                        return ChallengeOutcome::Resolved { id: id.to_string() };
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                error!(
                    verification_id = %id,
                    timeout_minutes = self.timeout.as_secs() / 60,
                    "verification_timeout"
                );
                self.registry.cancel(id);
                return ChallengeOutcome::TimedOut { id: id.to_string() };
            }

            let minutes = now.duration_since(started).as_secs() / 60;
            if minutes > reminded_minutes {
                reminded_minutes = minutes;
                warn!(
                    verification_id = %id,
                    minutes_waited = minutes,
                    timeout_minutes = self.timeout.as_secs() / 60,
                    "verification_still_waiting"
                );
            }

            let interval = self.poll_interval.min(deadline - now);
            state = self.watch.next_state(id, interval).await;
        }
    }

    async fn capture(&self, browser: &dyn BrowserHandle) -> Option<String> {
        if let Err(e) = std::fs::create_dir_all(&self.screenshot_dir) {
            error!(dir = %self.screenshot_dir.display(), error = %e, "screenshot_dir_create_failed");
            return None;
        }

        let name = format!("verification_{}.png", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.screenshot_dir.join(name);

        match browser.screenshot(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "verification_screenshot_saved");
                Some(path.display().to_string())
            }
            Err(e) => {
                error!(error = %e, "verification_screenshot_failed");
                None
            }
        }
    }
}
