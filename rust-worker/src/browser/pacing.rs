//! Settle delays between browser steps.

use std::time::Duration;

use tokio::time::sleep;

/// How long to let the page settle after each kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// After a navigation
    pub page_load: Duration,
    /// Between small interactions (focus, clear, type)
    pub step: Duration,
    /// After submitting a form or a post
    pub after_submit: Duration,
    /// After the password step, while the session is established
    pub login_complete: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            page_load: Duration::from_secs(3),
            step: Duration::from_secs(1),
            after_submit: Duration::from_secs(2),
            login_complete: Duration::from_secs(5),
        }
    }
}

impl Pacing {
    /// No delays at all; for doubles that settle instantly.
    pub fn immediate() -> Self {
        Self {
            page_load: Duration::ZERO,
            step: Duration::ZERO,
            after_submit: Duration::ZERO,
            login_complete: Duration::ZERO,
        }
    }

    pub async fn settle(d: Duration) {
        if !d.is_zero() {
            sleep(d).await;
        }
    }
}
