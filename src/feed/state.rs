//! Ordered, duplicate-free per-team feed state.

use chrono::{DateTime, Utc};

use crate::types::{Activity, ChatMessage};

/// Anything the feed can hold: identified by a gateway-assigned id, owned by
/// a team, sorted by creation time descending.
pub trait FeedItem: Clone {
    fn id(&self) -> &str;
    fn team_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

impl FeedItem for Activity {
    fn id(&self) -> &str {
        &self.id
    }
    fn team_id(&self) -> &str {
        &self.team_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl FeedItem for ChatMessage {
    fn id(&self) -> &str {
        &self.id
    }
    fn team_id(&self) -> &str {
        &self.team_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Merge counters, for monitoring and debugging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub inserts: usize,
    pub replacements: usize,
    pub removals: usize,
    pub ignored_duplicates: usize,
}

/// One team's ordered list. Maintains exactly one entry per id; order is
/// total by `created_at` descending with ties broken by arrival (the newer
/// arrival sorts ahead).
#[derive(Debug, Clone)]
pub struct FeedState<T: FeedItem> {
    items: Vec<T>,
    pub stats: FeedStats,
}

impl<T: FeedItem> Default for FeedState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FeedItem> FeedState<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            stats: FeedStats::default(),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    /// Atomic replacement of the whole list. The previous content is gone
    /// the moment this returns; no partial state is ever observable.
    pub fn replace_all(&mut self, items: Vec<T>) {
        let mut fresh: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            if !fresh.iter().any(|existing| existing.id() == item.id()) {
                fresh.push(item);
            }
        }
        fresh.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        self.items = fresh;
        self.stats = FeedStats::default();
    }

    fn ordered_insert(&mut self, item: T) {
        let at = self
            .items
            .iter()
            .position(|existing| existing.created_at() <= item.created_at())
            .unwrap_or(self.items.len());
        self.items.insert(at, item);
        self.stats.inserts += 1;
    }

    /// Insert-or-replace by id. Replacement keeps the entry's position so a
    /// field update never reorders the list.
    pub fn upsert(&mut self, item: T) {
        match self.position(item.id()) {
            Some(at) => {
                self.items[at] = item;
                self.stats.replacements += 1;
            }
            None => self.ordered_insert(item),
        }
    }

    /// Insert only when the id is not already present. Guards against the
    /// local writer receiving its own echo and double-inserting.
    pub fn insert_if_absent(&mut self, item: T) -> bool {
        if self.contains(item.id()) {
            self.stats.ignored_duplicates += 1;
            return false;
        }
        self.ordered_insert(item);
        true
    }

    /// Remove by id; absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(at) => {
                self.items.remove(at);
                self.stats.removals += 1;
                true
            }
            None => false,
        }
    }
}
