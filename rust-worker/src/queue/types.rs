//! Work items and their outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower runs first. Priority 0 is posted immediately by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const IMMEDIATE: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(1);

    pub fn is_immediate(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One post request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub content: String,
    pub priority: Priority,
    /// Producer label, e.g. `scheduler`, `mentions`, `web`
    pub source: String,
    pub enqueued_at: DateTime<Utc>,
    /// Tweet to reply to; `None` posts a new tweet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl WorkItem {
    pub fn new(content: &str, priority: Priority, source: &str) -> Self {
        Self {
            content: content.to_string(),
            priority,
            source: source.to_string(),
            enqueued_at: Utc::now(),
            reply_to: None,
        }
    }

    pub fn reply(tweet_id: &str, content: &str, priority: Priority, source: &str) -> Self {
        Self {
            reply_to: Some(tweet_id.to_string()),
            ..Self::new(content, priority, source)
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.reply_to.is_some() {
            "reply"
        } else {
            "tweet"
        }
    }
}

/// Where an item is in its life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum ItemState {
    Queued,
    Running,
    Posted,
    Failed(String),
    /// Dropped because a verification challenge was never resolved
    Abandoned(String),
}
