//! The pipeline contract every processing unit implements.
//!
//! [`Stage::accept`] is the fixed driver: admission control, then a worker
//! from the stage's queue, then the domain logic in [`Stage::work_on`], then
//! bookkeeping. The worker is released on every exit path.

use std::{
    cell::{Cell, RefCell},
    fmt,
    ops::Deref,
    rc::Rc,
};

use async_trait::async_trait;
use tracing::error;

use crate::{
    clock::Tick,
    context::SimContext,
    error::{Failure, RejectReason},
    event::{Event, Outcome},
    queue::{NoQueue, ServiceQueue, Worker},
    stats::{TimeStats, TrafficStats},
};

mod wrapped;

pub use wrapped::Wrapped;

/// A unit of the processing pipeline.
#[async_trait(?Send)]
pub trait Stage {
    /// Shared bookkeeping of the stage.
    fn core(&self) -> &StageCore;

    /// Name used in timing records and logs.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Aggregate time spent by all events in this stage.
    fn time(&self) -> TimeStats {
        self.core().time()
    }

    /// Traffic counters of this stage.
    fn traffic(&self) -> TrafficStats {
        self.core().traffic()
    }

    /// Admission control, run before the event reaches the queue.
    ///
    /// Rejects when the inbound queue is full.
    async fn admit(&self, _event: &Event) -> Result<(), Failure> {
        self.core().check_capacity()
    }

    /// Domain logic, run while the event holds a worker.
    async fn work_on(&self, event: &Event) -> Outcome;

    /// Drives `event` through the stage.
    async fn accept(&self, event: &Event) -> Outcome {
        let core = self.core();
        let clock = core.context().clock().clone();
        let index = event.push_stage_time(TimeStats::new(core.name()));
        core.count(|traffic| traffic.admitted += 1);

        if let Err(rejection) = self.admit(event).await {
            core.count(|traffic| traffic.rejected += 1);
            return Err(rejection);
        }

        let queued_at = clock.now();
        let worker = match core.queue().enqueue(event).await {
            Ok(worker) => worker,
            Err(rejection) => {
                core.count(|traffic| traffic.rejected += 1);
                return Err(rejection);
            }
        };
        let queue_time = clock.now().saturating_sub(queued_at);
        event.update_stage_time(index, |time| time.queue_time = queue_time);
        core.add_time(queue_time, 0);

        let _release = WorkerGuard(worker);
        core.count(|traffic| traffic.dispatched += 1);
        let started = clock.now();
        let outcome = self.work_on(event).await;
        let work_time = clock.now().saturating_sub(started);
        event.update_stage_time(index, |time| time.work_time = work_time);
        core.add_time(0, work_time);

        match &outcome {
            Ok(_) => core.count(|traffic| traffic.succeeded += 1),
            Err(failure) => {
                if let Failure::Unexpected(message) = failure {
                    error!(stage = core.name(), %message, "unexpected failure in stage");
                }
                core.count(|traffic| traffic.failed += 1);
            }
        }
        outcome
    }
}

/// Frees the worker when the stage is done with it, however it exits.
struct WorkerGuard(Worker);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.free();
    }
}

/// Counts one unit of work in progress for as long as it lives.
pub(crate) struct InFlight<C: Deref<Target = Cell<usize>>>(C);

impl<C: Deref<Target = Cell<usize>>> InFlight<C> {
    pub(crate) fn enter(counter: C) -> Self {
        counter.set(counter.get() + 1);
        Self(counter)
    }
}

impl<C: Deref<Target = Cell<usize>>> Drop for InFlight<C> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Name, context, inbound queue and statistics of a stage.
pub struct StageCore {
    name: String,
    ctx: SimContext,
    queue: RefCell<Rc<dyn ServiceQueue>>,
    time: RefCell<TimeStats>,
    traffic: Cell<TrafficStats>,
}

impl StageCore {
    /// Core without a queue: every admitted event is worked on immediately.
    pub fn new(ctx: &SimContext, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            time: RefCell::new(TimeStats::new(name.clone())),
            name,
            ctx: ctx.clone(),
            queue: RefCell::new(Rc::new(NoQueue)),
            traffic: Cell::new(TrafficStats::default()),
        }
    }

    /// Builder form of [`set_queue`](Self::set_queue).
    pub fn with_queue(self, queue: Rc<dyn ServiceQueue>) -> Self {
        self.set_queue(queue);
        self
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The run this stage belongs to.
    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    /// Current tick of the run.
    pub fn now(&self) -> Tick {
        self.ctx.clock().now()
    }

    /// The inbound queue.
    pub fn queue(&self) -> Rc<dyn ServiceQueue> {
        Rc::clone(&self.queue.borrow())
    }

    /// Swaps the inbound queue. Events already holding a worker keep it.
    pub fn set_queue(&self, queue: Rc<dyn ServiceQueue>) {
        *self.queue.borrow_mut() = queue;
    }

    /// Default admission check: reject when the inbound queue is full.
    pub fn check_capacity(&self) -> Result<(), Failure> {
        if self.queue.borrow().is_full() {
            return Err(Failure::Rejected(RejectReason::QueueFull));
        }
        Ok(())
    }

    /// Aggregate timing.
    pub fn time(&self) -> TimeStats {
        self.time.borrow().clone()
    }

    /// Traffic counters.
    pub fn traffic(&self) -> TrafficStats {
        self.traffic.get()
    }

    /// Zeroes timing and traffic. Only meaningful between runs.
    pub fn reset_stats(&self) {
        *self.time.borrow_mut() = TimeStats::new(self.name.clone());
        self.traffic.set(TrafficStats::default());
    }

    fn count(&self, update: impl FnOnce(&mut TrafficStats)) {
        let mut traffic = self.traffic.get();
        update(&mut traffic);
        self.traffic.set(traffic);
    }

    fn add_time(&self, queue_time: Tick, work_time: Tick) {
        let mut time = self.time.borrow_mut();
        time.queue_time += queue_time;
        time.work_time += work_time;
    }
}

impl fmt::Debug for StageCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageCore")
            .field("name", &self.name)
            .field("traffic", &self.traffic.get())
            .finish_non_exhaustive()
    }
}
