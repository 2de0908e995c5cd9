//! Persisted checkpoint document.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position in a listing: letter index (0 for unlettered listings) and page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingCursor {
    /// Index into the scope's alphabet.
    pub letter_index: usize,
    /// Last listing page fully enqueued; 0 when nothing was read yet.
    pub page: u32,
}

impl ListingCursor {
    /// Creates a cursor.
    #[must_use]
    pub fn new(letter_index: usize, page: u32) -> Self {
        Self { letter_index, page }
    }
}

/// Running totals across every run of a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointCounters {
    /// Media items inserted.
    pub new_items: u64,
    /// Media items enriched in place.
    pub updated_items: u64,
    /// Seasons inserted.
    pub new_seasons: u64,
    /// Episodes inserted.
    pub new_episodes: u64,
    /// Links inserted.
    pub new_links: u64,
    /// URLs completed.
    pub completed: u64,
    /// Items skipped after exhausting retries.
    pub skipped: u64,
}

/// Progress of one crawl scope.
///
/// Unknown fields are ignored on load so older binaries can read newer files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointState {
    /// Scope name.
    pub scope: String,
    /// Last listing position fully enqueued.
    pub cursor: ListingCursor,
    /// Discovered but not yet committed.
    pub pending_urls: BTreeSet<String>,
    /// Committed with their entity and links.
    pub completed_urls: BTreeSet<String>,
    /// Totals.
    pub counters: CheckpointCounters,
    /// Last failure reason per URL still pending.
    pub failed: BTreeMap<String, String>,
    /// Time of the last mutation.
    pub last_update: Option<DateTime<Utc>>,
}

impl CheckpointState {
    /// Empty state for a scope.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    /// Returns true if the URL was committed.
    #[must_use]
    pub fn is_completed(&self, url: &str) -> bool {
        self.completed_urls.contains(url)
    }

    /// Adds a URL to the pending set unless it is already completed.
    /// Returns true if the set changed.
    pub fn add_pending(&mut self, url: &str) -> bool {
        if self.is_completed(url) {
            return false;
        }
        self.pending_urls.insert(url.to_string())
    }

    /// Moves a URL from pending to completed and forgets its failure.
    pub fn complete(&mut self, url: &str) {
        self.pending_urls.remove(url);
        self.failed.remove(url);
        if self.completed_urls.insert(url.to_string()) {
            self.counters.completed += 1;
        }
    }

    /// Records a failure; the URL stays pending so the next run retries it.
    pub fn record_failure(&mut self, url: &str, reason: &str) {
        if self.is_completed(url) {
            return;
        }
        self.pending_urls.insert(url.to_string());
        self.failed.insert(url.to_string(), reason.to_string());
        self.counters.skipped += 1;
    }
}
