use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::Tick,
    context::SimContext,
    error::{Failure, RejectReason},
    event::{Event, Outcome},
    stage::{Stage, StageCore, Wrapped},
};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Calls flow through.
    Closed,
    /// Calls are rejected without reaching the wrapped stage.
    Open,
    /// Calls flow through until the ring decides the next state.
    HalfOpen,
}

/// Circuit breaker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate above which the breaker opens. A rate equal to it does not.
    pub error_threshold: f64,
    /// Number of recent outcomes kept in the ring.
    pub capacity: usize,
    /// Ticks the breaker stays open before trying half-open.
    pub time_in_open_state: Tick,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 0.3,
            capacity: 10,
            time_in_open_state: 3000,
        }
    }
}

/// Rolling record of the most recent outcomes, 1 marking a failure.
#[derive(Debug, Default)]
pub(crate) struct Ring {
    bits: VecDeque<u8>,
}

impl Ring {
    /// Appends an outcome, evicting the oldest ones beyond `capacity`.
    pub(crate) fn push(&mut self, failed: bool, capacity: usize) {
        self.bits.push_back(u8::from(failed));
        while self.bits.len() > capacity.max(1) {
            self.bits.pop_front();
        }
    }

    /// Failure rate over the ring, once it holds `capacity` outcomes.
    pub(crate) fn failure_rate(&self, capacity: usize) -> Option<f64> {
        let capacity = capacity.max(1);
        if self.bits.len() < capacity {
            return None;
        }
        let failures: u32 = self.bits.iter().map(|&bit| u32::from(bit)).sum();
        Some(f64::from(failures) / capacity as f64)
    }

    pub(crate) fn to_vec(&self) -> Vec<u8> {
        self.bits.iter().copied().collect()
    }

    fn clear(&mut self) {
        self.bits.clear();
    }
}

/// Ring of recent outcomes plus the state machine reading it.
#[derive(Debug)]
struct Window {
    state: BreakerState,
    ring: Ring,
    opened_at: Tick,
}

impl Window {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            ring: Ring::default(),
            opened_at: 0,
        }
    }

    fn record(&mut self, failed: bool, config: &CircuitBreakerConfig) {
        if self.state == BreakerState::Open {
            return;
        }
        self.ring.push(failed, config.capacity);
    }

    fn settle(&mut self, now: Tick, config: &CircuitBreakerConfig) {
        if self.state == BreakerState::Open {
            if now.saturating_sub(self.opened_at) <= config.time_in_open_state {
                return;
            }
            self.transition(BreakerState::HalfOpen, now);
        }

        let Some(rate) = self.ring.failure_rate(config.capacity) else {
            return;
        };
        let tripped = rate > config.error_threshold;
        match self.state {
            BreakerState::Closed if tripped => self.transition(BreakerState::Open, now),
            BreakerState::HalfOpen if tripped => self.transition(BreakerState::Open, now),
            BreakerState::HalfOpen => self.transition(BreakerState::Closed, now),
            _ => {}
        }
    }

    fn transition(&mut self, to: BreakerState, now: Tick) {
        debug!(from = ?self.state, to = ?to, tick = now, "circuit breaker transition");
        self.state = to;
        self.ring.clear();
        if to == BreakerState::Open {
            self.opened_at = now;
        }
    }
}

/// Stops calling the wrapped stage once its recent failure rate crosses a
/// threshold.
///
/// The state is reconsidered before every admission and after every
/// recorded outcome. While open, events are rejected at admission.
#[derive(Debug)]
pub struct CircuitBreaker {
    core: StageCore,
    wrapped: Wrapped,
    config: Cell<CircuitBreakerConfig>,
    window: RefCell<Window>,
}

impl CircuitBreaker {
    /// Wraps `inner` with default settings.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_config(ctx, inner, CircuitBreakerConfig::default())
    }

    /// Wraps `inner`.
    pub fn with_config(
        ctx: &SimContext,
        inner: Rc<dyn Stage>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            core: StageCore::new(ctx, "CircuitBreaker"),
            wrapped: Wrapped::new(inner),
            config: Cell::new(config),
            window: RefCell::new(Window::new()),
        }
    }

    /// Current settings.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut CircuitBreakerConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }

    /// Current state, after applying any elapsed open period.
    pub fn state(&self) -> BreakerState {
        self.settle();
        self.window.borrow().state
    }

    /// Recent outcomes, oldest first. 1 marks a failure.
    pub fn ring(&self) -> Vec<u8> {
        self.window.borrow().ring.to_vec()
    }

    /// Forces the breaker open from the current tick.
    pub fn trip(&self) {
        let mut window = self.window.borrow_mut();
        if window.state != BreakerState::Open {
            window.transition(BreakerState::Open, self.core.now());
        }
    }

    fn settle(&self) {
        let config = self.config.get();
        self.window.borrow_mut().settle(self.core.now(), &config);
    }

    fn record(&self, failed: bool) {
        let config = self.config.get();
        self.window.borrow_mut().record(failed, &config);
        self.settle();
    }
}

#[async_trait(?Send)]
impl Stage for CircuitBreaker {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn admit(&self, _event: &Event) -> Result<(), Failure> {
        if self.state() == BreakerState::Open {
            return Err(Failure::Rejected(RejectReason::BreakerOpen));
        }
        self.core.check_capacity()
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        let outcome = self.wrapped.delegate(event).await;
        self.record(outcome.is_err());
        outcome
    }
}
