//! Per-run shared state.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use crate::{
    clock::{Clock, ClockConfig},
    random::{RandomSource, SeededRandom},
    stats::Stats,
};

struct ContextInner {
    clock: Clock,
    stats: Stats,
    random: RefCell<Box<dyn RandomSource>>,
    event_ids: Cell<u64>,
}

/// Everything one simulation run shares: the clock, the statistics sink,
/// the random source and the event id counter.
///
/// Every stage and the driver hold a clone. Independent contexts never
/// observe each other.
#[derive(Clone)]
pub struct SimContext {
    inner: Rc<ContextInner>,
}

impl SimContext {
    /// Fresh context with a default clock and a generator seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Fresh context with a generator seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_parts(Clock::new(), Box::new(SeededRandom::new(seed)))
    }

    /// Fresh context with the given clock configuration, seeded with 0.
    pub fn with_clock_config(config: ClockConfig) -> Self {
        Self::with_parts(Clock::with_config(config), Box::new(SeededRandom::new(0)))
    }

    /// Assembles a context from an existing clock and random source.
    pub fn with_parts(clock: Clock, random: Box<dyn RandomSource>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                clock,
                stats: Stats::new(),
                random: RefCell::new(random),
                event_ids: Cell::new(0),
            }),
        }
    }

    /// The run's clock.
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// The run's statistics sink.
    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    /// Replaces the random source.
    pub fn set_random(&self, random: impl RandomSource + 'static) {
        *self.inner.random.borrow_mut() = Box::new(random);
    }

    /// Uniform sample in `[0, 1)`.
    pub fn uniform(&self) -> f64 {
        self.inner.random.borrow_mut().uniform()
    }

    /// Floored normal sample.
    pub fn normal(&self, mean: f64, std: f64) -> i64 {
        self.inner.random.borrow_mut().normal(mean, std)
    }

    pub(crate) fn next_event_id(&self) -> u64 {
        let id = self.inner.event_ids.get() + 1;
        self.inner.event_ids.set(id);
        id
    }

    /// Number of events created since the last reset.
    pub fn event_id_counter(&self) -> u64 {
        self.inner.event_ids.get()
    }

    /// Restarts event ids at 1. Only meaningful between runs.
    pub fn reset_event_ids(&self) {
        self.inner.event_ids.set(0);
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("now", &self.inner.clock.now())
            .field("event_ids", &self.inner.event_ids.get())
            .finish_non_exhaustive()
    }
}
