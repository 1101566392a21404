use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    clock::Tick,
    context::SimContext,
    event::{Event, Outcome, Payload},
    stage::{Stage, StageCore, Wrapped},
};

/// A cached payload and the tick it was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Tick of the last write.
    pub time: Tick,
    /// Payload returned on a hit.
    pub payload: Payload,
}

/// Storage behind a cache stage.
///
/// Reads take `&mut self` and the current tick so stores can evict lazily.
pub trait CacheStore {
    /// Looks up `key`.
    fn get(&mut self, key: &str, now: Tick) -> Option<CacheEntry>;
    /// Stores `entry` under `key`.
    fn set(&mut self, key: &str, entry: CacheEntry, now: Tick);
    /// Removes `key`, silently if absent.
    fn remove(&mut self, key: &str) -> Option<CacheEntry>;
    /// Removes every entry.
    fn clear(&mut self);
    /// Live keys.
    fn keys(&mut self, now: Tick) -> Vec<String>;
    /// Number of live entries.
    fn len(&mut self, now: Tick) -> usize {
        self.keys(now).len()
    }
}

/// Store that never evicts. Keys are listed in sorted order.
#[derive(Debug, Clone, Default)]
pub struct UnboundedStore {
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheStore for UnboundedStore {
    fn get(&mut self, key: &str, _now: Tick) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, entry: CacheEntry, _now: Tick) {
        self.entries.insert(key.to_string(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn keys(&mut self, _now: Tick) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&mut self, _now: Tick) -> usize {
        self.entries.len()
    }
}

/// Read-through cache in front of the wrapped stage.
///
/// A hit returns the cached payload without calling the wrapped stage. A
/// miss calls it and stores the payload only if the call succeeded.
pub struct Cache<S: CacheStore = UnboundedStore> {
    core: StageCore,
    wrapped: Wrapped,
    store: Rc<RefCell<S>>,
}

impl Cache<UnboundedStore> {
    /// Unbounded cache in front of `inner`.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_store(ctx, inner, "Cache", UnboundedStore::default())
    }
}

impl<S: CacheStore> Cache<S> {
    /// Cache in front of `inner` backed by `store`.
    pub fn with_store(ctx: &SimContext, inner: Rc<dyn Stage>, name: &str, store: S) -> Self {
        Self {
            core: StageCore::new(ctx, name),
            wrapped: Wrapped::new(inner),
            store: Rc::new(RefCell::new(store)),
        }
    }

    /// Looks up `key` at the current tick.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.core.now();
        self.store.borrow_mut().get(key, now)
    }

    /// Stores `payload` under `key`, stamped with the current tick.
    pub fn set(&self, key: &str, payload: Payload) {
        let now = self.core.now();
        self.store
            .borrow_mut()
            .set(key, CacheEntry { time: now, payload }, now);
    }

    /// Removes `key`, silently if absent.
    pub fn remove(&self, key: &str) {
        self.store.borrow_mut().remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.store.borrow_mut().clear();
    }

    /// Live keys at the current tick.
    pub fn keys(&self) -> Vec<String> {
        let now = self.core.now();
        self.store.borrow_mut().keys(now)
    }

    /// Number of live entries at the current tick.
    pub fn len(&self) -> usize {
        let now = self.core.now();
        self.store.borrow_mut().len(now)
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn store(&self) -> &Rc<RefCell<S>> {
        &self.store
    }
}

#[async_trait(?Send)]
impl<S: CacheStore> Stage for Cache<S> {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        if let Some(entry) = self.get(event.key()) {
            return Ok(entry.payload);
        }
        let outcome = self.wrapped.delegate(event).await;
        if let Ok(payload) = &outcome {
            self.set(event.key(), payload.clone());
        }
        outcome
    }
}

impl<S: CacheStore> fmt::Debug for Cache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("core", &self.core)
            .field("wrapped", &self.wrapped)
            .finish_non_exhaustive()
    }
}
