//! Rollback history of applied rewrites.
//!
//! Each compose context keeps a bounded list of `(original, modified)`
//! pairs so a rewrite can be undone later. Once a list is full the oldest
//! entry is evicted.

use crate::models::ReplyTarget;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of entries kept per compose context.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// One applied rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub id: u64,
    /// Text before the rewrite was applied.
    pub original: String,
    /// Text that replaced it.
    pub modified: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Bounded history for a single compose context.
#[derive(Debug, Clone)]
pub struct RollbackHistory {
    capacity: usize,
    entries: VecDeque<RollbackEntry>,
}

impl RollbackHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: RollbackEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<RollbackEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Remove and return the entry with the given id.
    pub fn take(&mut self, id: u64) -> Option<RollbackEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(index)
    }

    /// Remove and return the most recent entry.
    pub fn take_latest(&mut self) -> Option<RollbackEntry> {
        self.entries.pop_back()
    }
}

/// Histories for every compose context the broker has seen.
#[derive(Debug)]
pub struct HistoryBook {
    capacity: usize,
    next_id: u64,
    histories: HashMap<ReplyTarget, RollbackHistory>,
}

impl HistoryBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            histories: HashMap::new(),
        }
    }

    /// Record an applied rewrite and return the new entry's id.
    pub fn record(
        &mut self,
        target: ReplyTarget,
        original: String,
        modified: String,
        timestamp: i64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let capacity = self.capacity;
        let history = self
            .histories
            .entry(target)
            .or_insert_with(|| RollbackHistory::new(capacity));
        history.push(RollbackEntry {
            id,
            original,
            modified,
            timestamp,
        });
        debug!("Recorded rollback entry {} for {} ({} kept)", id, target, history.len());

        id
    }

    pub fn list(&self, target: &ReplyTarget) -> Vec<RollbackEntry> {
        self.histories
            .get(target)
            .map(RollbackHistory::entries)
            .unwrap_or_default()
    }

    /// Roll back a specific entry, or the latest one when `id` is `None`.
    pub fn rollback(&mut self, target: &ReplyTarget, id: Option<u64>) -> Option<RollbackEntry> {
        let history = self.histories.get_mut(target)?;
        match id {
            Some(id) => history.take(id),
            None => history.take_latest(),
        }
    }
}
