//! Bounded history of recent work items.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{ItemState, Priority, WorkItem};
use crate::util::text::preview;

const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub ticket: u64,
    pub kind: &'static str,
    pub source: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub preview: String,
    #[serde(flatten)]
    pub state: ItemState,
}

/// Totals since the process started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub posted: u64,
    pub failed: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
pub struct Ledger {
    entries: VecDeque<LedgerEntry>,
    capacity: usize,
    counts: OutcomeCounts,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            counts: OutcomeCounts::default(),
        }
    }

    pub fn record(&mut self, ticket: u64, item: &WorkItem, state: ItemState) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LedgerEntry {
            ticket,
            kind: item.kind(),
            source: item.source.clone(),
            priority: item.priority,
            enqueued_at: item.enqueued_at,
            preview: preview(&item.content, PREVIEW_CHARS),
            state,
        });
    }

    /// Move an entry to `state`, counting final outcomes once.
    pub fn update(&mut self, ticket: u64, state: ItemState) {
        match &state {
            ItemState::Posted => self.counts.posted += 1,
            ItemState::Failed(_) => self.counts.failed += 1,
            ItemState::Abandoned(_) => self.counts.abandoned += 1,
            ItemState::Queued | ItemState::Running => {}
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.ticket == ticket) {
            entry.state = state;
        }
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<LedgerEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn get(&self, ticket: u64) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.ticket == ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_is_bounded() {
        let mut ledger = Ledger::new(2);
        for ticket in 0..3 {
            ledger.record(ticket, &WorkItem::new("gm", Priority::NORMAL, "scheduler"), ItemState::Queued);
        }

        let tickets: Vec<u64> = ledger.recent().iter().map(|e| e.ticket).collect();
        assert_eq!(tickets, vec![2, 1]);
    }

    #[test]
    fn test_counts_survive_eviction() {
        let mut ledger = Ledger::new(1);
        let item = WorkItem::new("gm", Priority::NORMAL, "scheduler");
        ledger.record(1, &item, ItemState::Running);
        ledger.update(1, ItemState::Posted);
        ledger.record(2, &item, ItemState::Running);
        ledger.update(2, ItemState::Abandoned("verify_1 timed out".into()));

        assert_eq!(
            ledger.counts(),
            OutcomeCounts {
                posted: 1,
                failed: 0,
                abandoned: 1
            }
        );
        assert!(ledger.get(1).is_none());
    }

    #[test]
    fn test_entry_serialises_state_inline() {
        let mut ledger = Ledger::new(4);
        ledger.record(7, &WorkItem::reply("42", "thanks", Priority::NORMAL, "mentions"), ItemState::Queued);
        ledger.update(7, ItemState::Failed("no reply button".into()));

        let json = serde_json::to_value(&ledger.recent()[0]).unwrap();
        assert_eq!(json["kind"], "reply");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["detail"], "no reply button");
        assert_eq!(json["priority"], 1);
    }
}
