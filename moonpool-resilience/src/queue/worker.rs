use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use super::pool::{PoolQueue, PoolState};
use crate::event::Event;

#[derive(Debug)]
struct WorkerSlot {
    event: RefCell<Option<Event>>,
    owner: RefCell<Option<Weak<RefCell<PoolState>>>>,
}

/// An execution slot serving at most one event at a time.
///
/// A worker is reserved by binding an event and released with
/// [`free`](Worker::free).
#[derive(Debug, Clone)]
pub struct Worker {
    slot: Rc<WorkerSlot>,
}

impl Worker {
    pub(crate) fn attached(owner: Weak<RefCell<PoolState>>) -> Self {
        Self::with_owner(Some(owner))
    }

    pub(crate) fn detached() -> Self {
        Self::with_owner(None)
    }

    fn with_owner(owner: Option<Weak<RefCell<PoolState>>>) -> Self {
        Self {
            slot: Rc::new(WorkerSlot {
                event: RefCell::new(None),
                owner: RefCell::new(owner),
            }),
        }
    }

    /// The event being served, if any.
    pub fn event(&self) -> Option<Event> {
        self.slot.event.borrow().clone()
    }

    /// Returns `true` while an event is bound.
    pub fn is_busy(&self) -> bool {
        self.slot.event.borrow().is_some()
    }

    /// Returns `true` while the worker still reports to a queue.
    pub fn is_attached(&self) -> bool {
        self.slot.owner.borrow().is_some()
    }

    pub(crate) fn bind(&self, event: Event) {
        *self.slot.event.borrow_mut() = Some(event);
    }

    pub(crate) fn unbind(&self) {
        self.slot.event.borrow_mut().take();
    }

    /// Releases the bound event and lets the owning queue dispatch more work.
    ///
    /// Freeing an idle worker still notifies the queue.
    pub fn free(&self) {
        self.unbind();
        let owner = self.slot.owner.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(state) = owner {
            PoolQueue::dispatch(&state);
        }
    }

    /// Detaches the worker from its queue so freeing it no longer notifies it.
    pub fn destroy(&self) {
        self.slot.owner.borrow_mut().take();
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for Worker {}
