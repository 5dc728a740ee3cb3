//! In-process tweet queue.
//!
//! Producers push [`WorkItem`]s; one background worker pops them in priority
//! order and posts each under the browser lease.
//!
//! ## Architecture
//!
//! ```text
//! submit() ──priority 0──▶ posted inline by the caller (ledger only)
//!    │
//!    └──priority ≥ 1──▶ TweetQueue ──▶ worker ──▶ ItemExecutor (lease held)
//! ```
//!
//! Items with equal priority leave in submission order. Closing the queue lets
//! the worker drain what is already queued and then stop.

pub mod ledger;
pub mod types;
pub mod worker;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

pub use ledger::{Ledger, LedgerEntry, OutcomeCounts};
pub use types::{ItemState, Priority, WorkItem};
pub use worker::{run_worker, ItemExecutor};

/// Entries kept in the recent-items ledger
pub const LEDGER_CAPACITY: usize = 100;

struct QueueState {
    items: BTreeMap<(Priority, u64), WorkItem>,
    next_ticket: u64,
    closed: bool,
    ledger: Ledger,
}

/// Snapshot of the queue for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub closed: bool,
    #[serde(flatten)]
    pub counts: OutcomeCounts,
    pub recent: Vec<LedgerEntry>,
}

pub struct TweetQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl Default for TweetQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TweetQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: BTreeMap::new(),
                next_ticket: 0,
                closed: false,
                ledger: Ledger::new(LEDGER_CAPACITY),
            }),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an item for the worker. Returns its ticket, or `None` once closed.
    pub fn push(&self, item: WorkItem) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            warn!(source = %item.source, "queue_closed_item_rejected");
            return None;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.ledger.record(ticket, &item, ItemState::Queued);
        info!(
            ticket = ticket,
            priority = %item.priority,
            source = %item.source,
            kind = item.kind(),
            depth = state.items.len() + 1,
            "queue_item_added"
        );
        state.items.insert((item.priority, ticket), item);
        drop(state);

        self.available.notify_one();
        Some(ticket)
    }

    /// Ledger an item the caller runs itself. It never reaches the worker.
    pub fn record_inline(&self, item: &WorkItem) -> u64 {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.ledger.record(ticket, item, ItemState::Running);
        ticket
    }

    /// Next item in priority order, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<(u64, WorkItem)> {
        loop {
            {
                let mut state = self.lock();
                if let Some(((_, ticket), item)) = state.items.pop_first() {
                    state.ledger.update(ticket, ItemState::Running);
                    return Some((ticket, item));
                }
                if state.closed {
                    return None;
                }
            }
            self.available.notified().await;
        }
    }

    /// Record the final state of an item.
    pub fn finish(&self, ticket: u64, state: ItemState) {
        self.lock().ledger.update(ticket, state);
    }

    /// Stop accepting items and wake the worker so it can drain and exit.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        info!(remaining = state.items.len(), "queue_closed");
        drop(state);
        self.available.notify_one();
    }

    /// Accept items again after a close.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, ticket: u64) -> Option<LedgerEntry> {
        self.lock().ledger.get(ticket).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            depth: state.items.len(),
            closed: state.closed,
            counts: state.ledger.counts(),
            recent: state.ledger.recent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(content: &str, priority: u8) -> WorkItem {
        WorkItem::new(content, Priority(priority), "test")
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = TweetQueue::new();
        for content in ["A", "B", "C"] {
            queue.push(item(content, 1)).unwrap();
        }

        let mut order = Vec::new();
        while !queue.is_empty() {
            order.push(queue.pop().await.unwrap().1.content);
        }
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_lower_priority_number_first() {
        let queue = TweetQueue::new();
        queue.push(item("later", 2)).unwrap();
        queue.push(item("sooner", 1)).unwrap();

        assert_eq!(queue.pop().await.unwrap().1.content, "sooner");
        assert_eq!(queue.pop().await.unwrap().1.content, "later");
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(TweetQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.push(item("late", 1)).unwrap();
        let (_, popped) = waiter.await.unwrap().unwrap();
        assert_eq!(popped.content, "late");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = TweetQueue::new();
        queue.push(item("queued before close", 1)).unwrap();
        queue.close();

        assert!(queue.push(item("too late", 1)).is_none());
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());

        queue.reopen();
        assert!(queue.push(item("again", 1)).is_some());
    }

    #[tokio::test]
    async fn test_close_wakes_idle_worker() {
        let queue = Arc::new(TweetQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[test]
    fn test_inline_items_are_ledgered_not_queued() {
        let queue = TweetQueue::new();
        let ticket = queue.record_inline(&item("now", 0));
        queue.finish(ticket, ItemState::Posted);

        let stats = queue.stats();
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.counts.posted, 1);
        assert_eq!(queue.entry(ticket).unwrap().state, ItemState::Posted);
    }
}
