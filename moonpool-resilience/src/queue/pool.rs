use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{EnqueueFuture, ServiceQueue, Worker};
use crate::event::Event;

/// Order in which waiting items are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discipline {
    /// Oldest waiting item first.
    Fifo,
    /// Newest waiting item first.
    Lifo,
}

struct Waiting {
    event: Event,
    sender: oneshot::Sender<Worker>,
}

pub(crate) struct PoolState {
    discipline: Discipline,
    items: VecDeque<Waiting>,
    workers: Vec<Worker>,
    capacity: usize,
}

impl PoolState {
    fn free_worker(&self) -> Option<Worker> {
        self.workers.iter().find(|worker| !worker.is_busy()).cloned()
    }

    fn can_enqueue(&self) -> bool {
        self.items.len() < self.capacity
    }

    fn next_item(&mut self) -> Option<Waiting> {
        match self.discipline {
            Discipline::Fifo => self.items.pop_front(),
            Discipline::Lifo => self.items.pop_back(),
        }
    }
}

/// A bounded wait-list in front of a fixed pool of workers.
#[derive(Clone)]
pub struct PoolQueue {
    state: Rc<RefCell<PoolState>>,
}

impl PoolQueue {
    /// Creates a queue holding up to `capacity` waiting items, served by
    /// `num_workers` workers.
    pub fn new(discipline: Discipline, capacity: usize, num_workers: usize) -> Self {
        let queue = Self {
            state: Rc::new(RefCell::new(PoolState {
                discipline,
                items: VecDeque::new(),
                workers: Vec::new(),
                capacity,
            })),
        };
        queue.set_num_workers(num_workers);
        queue
    }

    /// Oldest-first queue.
    pub fn fifo(capacity: usize, num_workers: usize) -> Self {
        Self::new(Discipline::Fifo, capacity, num_workers)
    }

    /// Newest-first queue.
    pub fn lifo(capacity: usize, num_workers: usize) -> Self {
        Self::new(Discipline::Lifo, capacity, num_workers)
    }

    /// Dispatch order of this queue.
    pub fn discipline(&self) -> Discipline {
        self.state.borrow().discipline
    }

    /// Binds one waiting item to a free worker.
    ///
    /// Items whose caller stopped waiting are skipped.
    pub(crate) fn dispatch(state: &Rc<RefCell<PoolState>>) {
        loop {
            let (worker, waiting) = {
                let mut state = state.borrow_mut();
                let Some(worker) = state.free_worker() else {
                    return;
                };
                let Some(waiting) = state.next_item() else {
                    return;
                };
                worker.bind(waiting.event.clone());
                (worker, waiting)
            };
            match waiting.sender.send(worker) {
                Ok(()) => return,
                Err(worker) => {
                    trace!(event = waiting.event.id(), "waiter gone, skipping");
                    worker.unbind();
                }
            }
        }
    }
}

impl ServiceQueue for PoolQueue {
    fn enqueue(&self, event: &Event) -> EnqueueFuture {
        let mut state = self.state.borrow_mut();
        if let Some(worker) = state.free_worker() {
            worker.bind(event.clone());
            return EnqueueFuture::ready(worker);
        }
        // Waiters that gave up no longer hold a place in the wait-list.
        state.items.retain(|item| !item.sender.is_canceled());
        if state.can_enqueue() {
            let (sender, receiver) = oneshot::channel();
            state.items.push_back(Waiting {
                event: event.clone(),
                sender,
            });
            return EnqueueFuture::waiting(receiver);
        }
        EnqueueFuture::rejected()
    }

    fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    /// Shrinking below the current wait-list length rejects the items that
    /// would have been dispatched last.
    fn set_capacity(&self, capacity: usize) {
        let evicted: Vec<Waiting> = {
            let mut state = self.state.borrow_mut();
            state.capacity = capacity;
            let excess = state.items.len().saturating_sub(capacity);
            match state.discipline {
                Discipline::Fifo => {
                    let keep = state.items.len() - excess;
                    state.items.drain(keep..).collect()
                }
                Discipline::Lifo => state.items.drain(..excess).collect(),
            }
        };
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), capacity, "wait-list shrunk, rejecting overflow");
        }
    }

    fn num_workers(&self) -> usize {
        self.state.borrow().workers.len()
    }

    /// Growing adds idle workers and dispatches waiting items to them.
    /// Shrinking drops workers from the tail; a busy one finishes its event
    /// but no longer reports back.
    fn set_num_workers(&self, num_workers: usize) {
        let added = {
            let mut state = self.state.borrow_mut();
            let current = state.workers.len();
            if num_workers > current {
                let owner = Rc::downgrade(&self.state);
                state
                    .workers
                    .extend((current..num_workers).map(|_| Worker::attached(owner.clone())));
                num_workers - current
            } else {
                for worker in state.workers.drain(num_workers..) {
                    worker.destroy();
                }
                0
            }
        };
        for _ in 0..added {
            Self::dispatch(&self.state);
        }
        debug!(workers = num_workers, "worker pool resized");
    }

    fn working(&self) -> usize {
        self.state
            .borrow()
            .workers
            .iter()
            .filter(|worker| worker.is_busy())
            .count()
    }

    fn can_enqueue(&self) -> bool {
        self.state.borrow().can_enqueue()
    }

    fn has_free_worker(&self) -> bool {
        self.state.borrow().free_worker().is_some()
    }

    fn work(&self) {
        Self::dispatch(&self.state);
    }
}

impl fmt::Debug for PoolQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PoolQueue")
            .field("discipline", &state.discipline)
            .field("waiting", &state.items.len())
            .field("capacity", &state.capacity)
            .field("workers", &state.workers.len())
            .finish()
    }
}
