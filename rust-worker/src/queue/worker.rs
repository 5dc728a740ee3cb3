//! The single background worker draining the tweet queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

use super::types::{ItemState, WorkItem};
use super::TweetQueue;

/// Performs one queued item. Implementations hold the browser lease while
/// they run.
#[async_trait]
pub trait ItemExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> ItemState;
}

/// Marks the running item abandoned if the worker is dropped mid-item.
struct Running<'a> {
    queue: &'a TweetQueue,
    ticket: u64,
    settled: bool,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(ticket = self.ticket, "tweet_worker_item_interrupted");
            self.queue
                .finish(self.ticket, ItemState::Abandoned("worker stopped".to_string()));
        }
    }
}

/// Pop and execute items until the queue is closed and drained.
///
/// Items run inline, so aborting the worker task also drops the item in
/// progress and releases whatever it holds. A panic while posting is logged
/// as a failure and the loop moves on.
pub async fn run_worker(queue: Arc<TweetQueue>, executor: Arc<dyn ItemExecutor>) {
    info!("tweet_worker_started");

    while let Some((ticket, item)) = queue.pop().await {
        let started = Instant::now();
        info!(
            ticket = ticket,
            source = %item.source,
            kind = item.kind(),
            "tweet_worker_item_started"
        );

        let mut running = Running {
            queue: &queue,
            ticket,
            settled: false,
        };

        let state = match AssertUnwindSafe(executor.execute(&item)).catch_unwind().await {
            Ok(state) => state,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(ticket = ticket, reason = %reason, "tweet_worker_item_panicked");
                ItemState::Failed(format!("worker task panicked: {}", reason))
            }
        };
        running.settled = true;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &state {
            ItemState::Posted => {
                info!(ticket = ticket, duration_ms = duration_ms, "tweet_worker_item_posted")
            }
            ItemState::Failed(reason) => {
                error!(ticket = ticket, duration_ms = duration_ms, reason = %reason, "tweet_worker_item_failed")
            }
            ItemState::Abandoned(reason) => {
                warn!(ticket = ticket, duration_ms = duration_ms, reason = %reason, "tweet_worker_item_abandoned")
            }
            ItemState::Queued | ItemState::Running => {}
        }
        queue.finish(ticket, state);
    }

    info!("tweet_worker_stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
