//! Recent notifications received by the admin surface.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notify::Notification;

const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNotification {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub received_at: DateTime<Utc>,
}

/// Bounded in-memory log, newest last.
#[derive(Debug)]
pub struct NotificationLog {
    entries: Mutex<VecDeque<StoredNotification>>,
    capacity: usize,
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NotificationLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, notification: Notification) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(StoredNotification {
            message: notification.message,
            kind: notification.kind,
            received_at: Utc::now(),
        });
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<StoredNotification> {
        self.entries
            .lock()
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
