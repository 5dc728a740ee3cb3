//! Waiting for a verification to change state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::record::VerificationStatus;
use super::registry::VerificationRegistry;

/// Source of verification state changes for a waiting challenge flow.
#[async_trait]
pub trait ResolutionWatch: Send + Sync {
    /// Wait up to `interval`, then report the record's current status.
    async fn next_state(&self, id: &str, interval: Duration) -> Option<VerificationStatus>;
}

/// Sleeps one interval and re-reads the shared registry file.
pub struct PollingWatch {
    registry: Arc<VerificationRegistry>,
}

impl PollingWatch {
    pub fn new(registry: Arc<VerificationRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ResolutionWatch for PollingWatch {
    async fn next_state(&self, id: &str, interval: Duration) -> Option<VerificationStatus> {
        sleep(interval).await;
        self.registry.status(id)
    }
}
