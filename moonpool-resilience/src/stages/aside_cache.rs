use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use async_trait::async_trait;
use tracing::trace;

use super::cache::{CacheEntry, CacheStore, UnboundedStore};
use crate::{
    context::SimContext,
    error::Failure,
    event::{Event, Outcome},
    stage::{InFlight, Stage, StageCore, Wrapped},
};

/// Cache that answers only from what it already holds.
///
/// Every read starts a background refresh from the wrapped stage without
/// waiting for it, then answers from the store. The first read of any key
/// therefore fails.
pub struct AsideCache<S: CacheStore = UnboundedStore> {
    core: StageCore,
    wrapped: Wrapped,
    store: Rc<RefCell<S>>,
    refreshing: Rc<Cell<usize>>,
}

impl AsideCache<UnboundedStore> {
    /// Unbounded aside cache in front of `inner`.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_store(ctx, inner, UnboundedStore::default())
    }
}

impl<S: CacheStore + 'static> AsideCache<S> {
    /// Aside cache in front of `inner` backed by `store`.
    pub fn with_store(ctx: &SimContext, inner: Rc<dyn Stage>, store: S) -> Self {
        Self {
            core: StageCore::new(ctx, "AsideCache"),
            wrapped: Wrapped::new(inner),
            store: Rc::new(RefCell::new(store)),
            refreshing: Rc::new(Cell::new(0)),
        }
    }

    /// Looks up `key` at the current tick.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.core.now();
        self.store.borrow_mut().get(key, now)
    }

    /// Live keys at the current tick.
    pub fn keys(&self) -> Vec<String> {
        let now = self.core.now();
        self.store.borrow_mut().keys(now)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.store.borrow_mut().clear();
    }

    /// Background refreshes still running.
    pub fn refreshing(&self) -> usize {
        self.refreshing.get()
    }

    fn refresh(&self, event: &Event) -> Result<(), Failure> {
        let clock = self.core.context().clock().downgrade();
        let inner = Rc::clone(self.wrapped.inner());
        let store = Rc::clone(&self.store);
        let refreshing = InFlight::enter(Rc::clone(&self.refreshing));
        let event = event.clone();

        // The handle is dropped on purpose: the refresh outlives this read.
        let _refresh = self.core.context().clock().spawn(async move {
            let _refreshing = refreshing;
            let outcome = inner.accept(&event).await;
            if let (Ok(payload), Ok(now)) = (outcome, clock.now()) {
                store
                    .borrow_mut()
                    .set(event.key(), CacheEntry { time: now, payload }, now);
                trace!(key = event.key(), tick = now, "aside cache refreshed");
            }
        })?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl<S: CacheStore + 'static> Stage for AsideCache<S> {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        self.refresh(event)?;
        match self.get(event.key()) {
            Some(entry) => Ok(entry.payload),
            None => Err(Failure::CacheMiss),
        }
    }
}

impl<S: CacheStore> fmt::Debug for AsideCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsideCache")
            .field("core", &self.core)
            .field("wrapped", &self.wrapped)
            .field("refreshing", &self.refreshing.get())
            .finish_non_exhaustive()
    }
}
