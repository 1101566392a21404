use std::{cell::Cell, rc::Rc};

use async_trait::async_trait;
use futures::future::{self, Either};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::Tick,
    context::SimContext,
    error::Failure,
    event::{Event, Outcome},
    stage::{InFlight, Stage, StageCore, Wrapped},
};

/// Timeout tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ticks to wait for the wrapped stage.
    pub timeout: Tick,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { timeout: 300 }
    }
}

/// Bounds the time spent waiting on the wrapped stage.
///
/// The wrapped call runs as its own task and races a timer. When the timer
/// wins the call is abandoned, not cancelled: it keeps running to completion
/// and its result is discarded.
#[derive(Debug)]
pub struct Timeout {
    core: StageCore,
    wrapped: Wrapped,
    config: Cell<TimeoutConfig>,
    in_flight: Rc<Cell<usize>>,
}

impl Timeout {
    /// Wraps `inner` with default settings.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_config(ctx, inner, TimeoutConfig::default())
    }

    /// Wraps `inner`.
    pub fn with_config(ctx: &SimContext, inner: Rc<dyn Stage>, config: TimeoutConfig) -> Self {
        Self {
            core: StageCore::new(ctx, "Timeout"),
            wrapped: Wrapped::new(inner),
            config: Cell::new(config),
            in_flight: Rc::new(Cell::new(0)),
        }
    }

    /// Current settings.
    pub fn config(&self) -> TimeoutConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut TimeoutConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }

    /// Wrapped calls still running, abandoned ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }
}

#[async_trait(?Send)]
impl Stage for Timeout {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        let clock = self.core.context().clock();
        let inner = Rc::clone(self.wrapped.inner());
        let call_event = event.clone();
        let in_flight = InFlight::enter(Rc::clone(&self.in_flight));

        let call = clock.spawn(async move {
            let _in_flight = in_flight;
            inner.accept(&call_event).await
        })?;
        let timer = clock.wait(self.config.get().timeout);

        match future::select(call, timer).await {
            Either::Left((outcome, _timer)) => outcome?,
            Either::Right((fired, _call)) => {
                fired?;
                debug!(event = event.id(), tick = clock.now(), "wrapped call timed out");
                Err(Failure::Timeout)
            }
        }
    }
}
