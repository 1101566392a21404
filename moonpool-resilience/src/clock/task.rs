//! Handles to tasks spawned on the clock's executor.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::{SimulationError, SimulationResult};

/// Handle to a task spawned with [`Clock::spawn`](super::Clock::spawn).
///
/// Awaiting the handle yields the task's output. Dropping the handle does
/// not cancel the task: it keeps running until it completes on its own.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
    finished: Rc<Cell<bool>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<T>, finished: Rc<Cell<bool>>) -> Self {
        Self { receiver, finished }
    }

    /// Returns `true` once the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    pub(crate) fn finished_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.finished)
    }

    /// Takes the output without waiting, if the task already completed.
    pub fn try_take(&mut self) -> SimulationResult<Option<T>> {
        self.receiver
            .try_recv()
            .map_err(|_| SimulationError::SimulationShutdown)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = SimulationResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| SimulationError::SimulationShutdown))
    }
}
