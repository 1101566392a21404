use std::{cell::Cell, rc::Rc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    context::SimContext,
    error::Failure,
    event::{Event, Outcome},
    stage::{Stage, StageCore, Wrapped},
};

/// Retry tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of calls, the first one included. Values below 1 count as 1.
    pub attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 2 }
    }
}

/// Calls the wrapped stage again until it succeeds or attempts run out.
///
/// Intermediate failure payloads are dropped; exhausting every attempt
/// fails with a generic payload.
#[derive(Debug)]
pub struct Retry {
    core: StageCore,
    wrapped: Wrapped,
    config: Cell<RetryConfig>,
}

impl Retry {
    /// Wraps `inner` with default settings.
    pub fn new(ctx: &SimContext, inner: Rc<dyn Stage>) -> Self {
        Self::with_config(ctx, inner, RetryConfig::default())
    }

    /// Wraps `inner`.
    pub fn with_config(ctx: &SimContext, inner: Rc<dyn Stage>, config: RetryConfig) -> Self {
        Self {
            core: StageCore::new(ctx, "Retry"),
            wrapped: Wrapped::new(inner),
            config: Cell::new(config),
        }
    }

    /// Current settings.
    pub fn config(&self) -> RetryConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut RetryConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }
}

#[async_trait(?Send)]
impl Stage for Retry {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, event: &Event) -> Outcome {
        let attempts = self.config.get().attempts.max(1);
        for attempt in 1..=attempts {
            match self.wrapped.delegate(event).await {
                Ok(payload) => return Ok(payload),
                Err(failure) => {
                    debug!(event = event.id(), attempt, attempts, %failure, "attempt failed")
                }
            }
        }
        Err(Failure::Exhausted { attempts })
    }
}
