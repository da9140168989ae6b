//! Bounded, thread-safe clipboard history.
//!
//! History is kept in memory only; a restart yields an empty store. This is
//! deliberate: clipboard contents are sensitive and must not land on disk
//! without an explicit opt-in.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::protocol::constants::DEFAULT_HISTORY_LIMIT;

/// Smallest configurable history limit.
pub const MIN_HISTORY_LIMIT: usize = 10;
/// Largest configurable history limit.
pub const MAX_HISTORY_LIMIT: usize = 200;

/// A single clipboard history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub content: String,
    pub source_peer: String,
    pub timestamp_ms: u64,
}

struct Inner {
    limit: usize,
    entries: VecDeque<HistoryEntry>,
}

/// Ring buffer of recent clipboard entries with per-peer queries.
pub struct HistoryStore {
    inner: Mutex<Inner>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                limit: limit.clamp(MIN_HISTORY_LIMIT, MAX_HISTORY_LIMIT),
                entries: VecDeque::new(),
            }),
        }
    }

    /// Record an entry; oldest entries are dropped past the limit.
    /// Returns the generated entry id.
    pub fn record(&self, content: String, source_peer: String) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = HistoryEntry {
            id: id.clone(),
            content,
            source_peer,
            timestamp_ms: now_ms(),
        };

        let mut inner = self.inner.lock().expect("history mutex poisoned");
        inner.entries.push_back(entry);
        while inner.entries.len() > inner.limit {
            inner.entries.pop_front();
        }
        id
    }

    /// Most recent entries, newest first, up to `limit`.
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent entries from one source peer, newest first.
    pub fn list_for_peer(&self, source_peer: &str, limit: usize) -> Vec<HistoryEntry> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner
            .entries
            .iter()
            .rev()
            .filter(|e| e.source_peer == source_peer)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search, newest first. `source_peer`
    /// narrows the search to one peer when given.
    pub fn search(
        &self,
        needle: &str,
        source_peer: Option<&str>,
        limit: usize,
    ) -> Vec<HistoryEntry> {
        let needle = needle.to_lowercase();
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner
            .entries
            .iter()
            .rev()
            .filter(|e| source_peer.map_or(true, |p| e.source_peer == p))
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up an entry by id.
    pub fn find(&self, id: &str) -> Option<HistoryEntry> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner.entries.iter().find(|e| e.id == id).cloned()
    }

    /// Change the capacity; shrinking drops the oldest entries. Values are
    /// clamped to the supported range.
    pub fn set_limit(&self, limit: usize) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        inner.limit = limit.clamp(MIN_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
        while inner.entries.len() > inner.limit {
            inner.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
