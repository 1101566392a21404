use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::circuit_breaker::Ring;
use crate::{
    context::SimContext,
    event::{Event, Outcome},
    queue::ServiceQueue,
    stage::{Stage, StageCore, Wrapped},
};

/// Adaptive breaker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Failure rate above which the pool shrinks. A rate equal to it grows it.
    pub error_threshold: f64,
    /// Number of recent outcomes kept in the ring.
    pub capacity: usize,
    /// Scale removed when the failure rate is above threshold.
    pub decrease_step: f64,
    /// Scale added otherwise.
    pub increase_step: f64,
    /// Lowest scale allowed.
    pub min_scale: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            error_threshold: 0.3,
            capacity: 10,
            decrease_step: 0.005,
            increase_step: 0.001,
            min_scale: 0.000_001,
        }
    }
}

struct Scaling {
    queue: Rc<dyn ServiceQueue>,
    max_workers: usize,
    scale: f64,
}

/// Resizes a queue's worker pool from the rolling failure rate of the
/// wrapped stage. Slow to scale up, quick to scale down.
///
/// Unlike [`CircuitBreaker`](super::CircuitBreaker) it never opens: every
/// event reaches the wrapped stage, and once the ring is full every recorded
/// outcome retargets the pool.
pub struct AdaptiveCircuitBreaker {
    core: StageCore,
    wrapped: Wrapped,
    config: Cell<AdaptiveConfig>,
    ring: RefCell<Ring>,
    scaling: RefCell<Option<Scaling>>,
}

impl AdaptiveCircuitBreaker {
    /// Wraps `inner` with default settings.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_config(ctx, inner, AdaptiveConfig::default())
    }

    /// Wraps `inner`.
    pub fn with_config(ctx: &SimContext, inner: Rc<dyn Stage>, config: AdaptiveConfig) -> Self {
        Self {
            core: StageCore::new(ctx, "AdaptiveCircuitBreaker"),
            wrapped: Wrapped::new(inner),
            config: Cell::new(config),
            ring: RefCell::new(Ring::default()),
            scaling: RefCell::new(None),
        }
    }

    /// Current settings.
    pub fn config(&self) -> AdaptiveConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut AdaptiveConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }

    /// Recent outcomes, oldest first. 1 marks a failure.
    pub fn ring(&self) -> Vec<u8> {
        self.ring.borrow().to_vec()
    }

    /// Failure rate over the ring, `None` until it is full.
    pub fn failure_rate(&self) -> Option<f64> {
        self.ring.borrow().failure_rate(self.config.get().capacity)
    }

    /// Binds the queue whose worker count is retargeted. Its current size
    /// becomes the maximum and the scale restarts at 1.
    pub fn set_queue_to_scale(&self, queue: Rc<dyn ServiceQueue>) {
        let max_workers = queue.num_workers();
        *self.scaling.borrow_mut() = Some(Scaling {
            queue,
            max_workers,
            scale: 1.0,
        });
    }

    /// Current fraction of the maximum worker count, 1 when no queue is bound.
    pub fn scale(&self) -> f64 {
        self.scaling.borrow().as_ref().map_or(1.0, |s| s.scale)
    }

    fn retarget(&self, failure_rate: f64) {
        let config = self.config.get();
        let (queue, target) = {
            let mut scaling = self.scaling.borrow_mut();
            let Some(scaling) = scaling.as_mut() else {
                return;
            };
            scaling.scale = if failure_rate > config.error_threshold {
                (scaling.scale - config.decrease_step).max(config.min_scale)
            } else {
                (scaling.scale + config.increase_step).min(1.0)
            };
            let target = (scaling.max_workers as f64 * scaling.scale).ceil() as usize;
            (Rc::clone(&scaling.queue), target)
        };

        let before = queue.num_workers();
        queue.set_num_workers(target);
        let stats = self.core.context().stats();
        if queue.num_workers() < before {
            stats.add("acb.decrease", 1.0);
        } else {
            stats.add("acb.increase", 1.0);
        }
        trace!(failure_rate, before, after = target, "retargeted worker pool");
    }
}

#[async_trait(?Send)]
impl Stage for AdaptiveCircuitBreaker {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        let outcome = self.wrapped.delegate(event).await;
        let capacity = self.config.get().capacity;
        let failure_rate = {
            let mut ring = self.ring.borrow_mut();
            ring.push(outcome.is_err(), capacity);
            ring.failure_rate(capacity)
        };
        if let Some(rate) = failure_rate {
            self.retarget(rate);
        }
        outcome
    }
}

impl fmt::Debug for AdaptiveCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveCircuitBreaker")
            .field("core", &self.core)
            .field("ring", &self.ring)
            .field("scale", &self.scale())
            .finish()
    }
}
