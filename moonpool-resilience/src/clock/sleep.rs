//! Sleeping in virtual time.
//!
//! A [`SleepFuture`] resolves once the clock fires the timer registered for
//! it. Dropping an unfinished sleep unregisters it so the timer becomes a
//! no-op when it comes due.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::WeakClock;
use crate::SimulationResult;

/// Future that completes after a number of ticks has elapsed on the clock.
#[derive(Debug)]
pub struct SleepFuture {
    /// Weak reference to the clock that owns the timer
    clock: WeakClock,
    /// Identifier of the timer in the clock's sleep registry
    sleep_id: u64,
    /// Whether this future has already completed
    completed: bool,
}

impl SleepFuture {
    pub(crate) fn new(clock: WeakClock, sleep_id: u64) -> Self {
        Self {
            clock,
            sleep_id,
            completed: false,
        }
    }
}

impl Future for SleepFuture {
    type Output = SimulationResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }

        let clock = match self.clock.upgrade() {
            Ok(clock) => clock,
            Err(e) => return Poll::Ready(Err(e)),
        };

        if clock.poll_sleep(self.sleep_id, cx.waker()) {
            self.completed = true;
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

impl Drop for SleepFuture {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Ok(clock) = self.clock.upgrade() {
            clock.cancel_sleep(self.sleep_id);
        }
    }
}
