//! Wait-lists combined with worker pools.
//!
//! A [`ServiceQueue`] hands out [`Worker`]s. An event either gets a free
//! worker immediately, waits in a bounded wait-list until one frees up, or is
//! rejected on the spot.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::{
    error::{Failure, RejectReason},
    event::Event,
};

mod no_queue;
mod pool;
mod worker;

pub use no_queue::NoQueue;
pub use pool::{Discipline, PoolQueue};
pub use worker::Worker;

/// A wait-list plus worker pool.
///
/// All methods take `&self`; queues are shared between a stage and whatever
/// retargets them at runtime.
pub trait ServiceQueue {
    /// Requests a worker for `event`.
    ///
    /// The decision is taken at call time: bind a free worker, else append to
    /// the wait-list if it has room, else reject.
    fn enqueue(&self, event: &Event) -> EnqueueFuture;

    /// Waiting items.
    fn len(&self) -> usize;

    /// Returns `true` when nothing is waiting.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting items.
    fn capacity(&self) -> usize;

    /// Changes the wait-list bound. Items already waiting are kept.
    fn set_capacity(&self, capacity: usize);

    /// Size of the worker pool.
    fn num_workers(&self) -> usize;

    /// Grows or shrinks the worker pool.
    fn set_num_workers(&self, num_workers: usize);

    /// Workers currently bound to an event.
    fn working(&self) -> usize;

    /// Returns `true` when an event would be rejected right now.
    fn is_full(&self) -> bool {
        !self.can_enqueue() && !self.has_free_worker()
    }

    /// Returns `true` while the wait-list has room.
    fn can_enqueue(&self) -> bool;

    /// Returns `true` when some worker is idle.
    fn has_free_worker(&self) -> bool;

    /// Binds the next waiting item to a free worker, if both exist.
    fn work(&self);
}

enum EnqueueState {
    Done(Option<Result<Worker, Failure>>),
    Waiting(oneshot::Receiver<Worker>),
}

/// Resolves to the worker bound to an enqueued event.
pub struct EnqueueFuture {
    state: EnqueueState,
}

impl EnqueueFuture {
    pub(crate) fn ready(worker: Worker) -> Self {
        Self {
            state: EnqueueState::Done(Some(Ok(worker))),
        }
    }

    pub(crate) fn rejected() -> Self {
        Self {
            state: EnqueueState::Done(Some(Err(Failure::Rejected(RejectReason::QueueFull)))),
        }
    }

    pub(crate) fn waiting(receiver: oneshot::Receiver<Worker>) -> Self {
        Self {
            state: EnqueueState::Waiting(receiver),
        }
    }

    /// Returns `true` if the event had to join the wait-list.
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, EnqueueState::Waiting(_))
    }
}

impl Drop for EnqueueFuture {
    /// A worker handed over but never collected goes back to its queue.
    fn drop(&mut self) {
        let unclaimed = match &mut self.state {
            EnqueueState::Done(result) => result.take().and_then(Result::ok),
            EnqueueState::Waiting(receiver) => {
                receiver.close();
                receiver.try_recv().ok().flatten()
            }
        };
        if let Some(worker) = unclaimed {
            worker.free();
        }
    }
}

impl Future for EnqueueFuture {
    type Output = Result<Worker, Failure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            EnqueueState::Done(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(Failure::Unexpected(
                    "enqueue polled after completion".to_string(),
                ))
            })),
            EnqueueState::Waiting(receiver) => Pin::new(receiver).poll(cx).map(|result| {
                // The queue let go of the item without a worker: evicted or dropped.
                result.map_err(|_| Failure::Rejected(RejectReason::QueueFull))
            }),
        }
    }
}
