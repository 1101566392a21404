use std::{
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::cache::{Cache, CacheEntry, CacheStore};
use crate::{clock::Tick, context::SimContext, stage::Stage};

/// LRU store tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LruConfig {
    /// Entries older than this many ticks are evicted.
    pub ttl: Tick,
    /// Most live entries kept.
    pub capacity: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            ttl: 10_000,
            capacity: 1_000,
        }
    }
}

/// Fixed-capacity store evicting expired entries, then least recently used ones.
///
/// Both eviction passes run on every read and write. Recency is updated on
/// hits and on writes.
#[derive(Debug, Clone, Default)]
pub struct LruStore {
    config: LruConfig,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl LruStore {
    /// Empty store.
    pub fn new(config: LruConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Current settings.
    pub fn config(&self) -> LruConfig {
        self.config
    }

    /// Changes settings; they apply from the next read or write.
    pub fn configure(&mut self, update: impl FnOnce(&mut LruConfig)) {
        update(&mut self.config);
    }

    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
        self.order.push_back(key.to_string());
    }

    fn prune(&mut self, now: Tick) {
        let ttl = self.config.ttl;
        let entries = &mut self.entries;
        self.order.retain(|key| {
            let expired = entries
                .get(key)
                .map_or(true, |entry| now.saturating_sub(entry.time) > ttl);
            if expired {
                entries.remove(key);
            }
            !expired
        });

        while self.order.len() > self.config.capacity {
            if let Some(key) = self.order.pop_front() {
                trace!(%key, "evicting least recently used");
                self.entries.remove(&key);
            }
        }
    }
}

impl CacheStore for LruStore {
    fn get(&mut self, key: &str, now: Tick) -> Option<CacheEntry> {
        self.prune(now);
        let entry = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(entry)
    }

    fn set(&mut self, key: &str, entry: CacheEntry, now: Tick) {
        self.touch(key);
        self.entries.insert(key.to_string(), entry);
        self.prune(now);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Live keys, least recently used first.
    fn keys(&mut self, now: Tick) -> Vec<String> {
        self.prune(now);
        self.order.iter().cloned().collect()
    }
}

/// Read-through cache with TTL and LRU eviction.
pub type LruCache = Cache<LruStore>;

impl Cache<LruStore> {
    /// LRU cache in front of `inner` with default settings.
    pub fn lru(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::lru_with_config(ctx, inner, LruConfig::default())
    }

    /// LRU cache in front of `inner`.
    pub fn lru_with_config(ctx: &SimContext, inner: Rc<dyn Stage>, config: LruConfig) -> Self {
        Self::with_store(ctx, inner, "LRUCache", LruStore::new(config))
    }

    /// Current settings.
    pub fn config(&self) -> LruConfig {
        self.store().borrow().config()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut LruConfig)) {
        self.store().borrow_mut().configure(update);
    }
}
