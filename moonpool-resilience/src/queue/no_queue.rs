use super::{EnqueueFuture, ServiceQueue, Worker};
use crate::event::Event;

/// No wait-list and no pool: every event gets its own worker immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQueue;

impl ServiceQueue for NoQueue {
    fn enqueue(&self, event: &Event) -> EnqueueFuture {
        let worker = Worker::detached();
        worker.bind(event.clone());
        EnqueueFuture::ready(worker)
    }

    fn len(&self) -> usize {
        0
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }

    fn set_capacity(&self, _capacity: usize) {}

    fn num_workers(&self) -> usize {
        usize::MAX
    }

    fn set_num_workers(&self, _num_workers: usize) {}

    fn working(&self) -> usize {
        0
    }

    fn is_full(&self) -> bool {
        false
    }

    fn can_enqueue(&self) -> bool {
        false
    }

    fn has_free_worker(&self) -> bool {
        true
    }

    fn work(&self) {}
}
