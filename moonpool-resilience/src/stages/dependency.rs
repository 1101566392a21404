//! Leaf stages standing in for downstream services.

use std::cell::Cell;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    context::SimContext,
    error::Failure,
    event::{Event, Outcome},
    stage::{InFlight, Stage, StageCore},
};

/// Settings of an [`AvailableDependency`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableDependencyConfig {
    /// Probability that a call succeeds.
    pub availability: f64,
}

impl Default for AvailableDependencyConfig {
    fn default() -> Self {
        Self { availability: 0.7 }
    }
}

/// Answers instantly, succeeding with a fixed probability.
#[derive(Debug)]
pub struct AvailableDependency {
    core: StageCore,
    config: Cell<AvailableDependencyConfig>,
}

impl AvailableDependency {
    /// Dependency with default settings.
    pub fn new(ctx: &SimContext) -> Self {
        Self::with_config(ctx, AvailableDependencyConfig::default())
    }

    /// Dependency with the given settings.
    pub fn with_config(ctx: &SimContext, config: AvailableDependencyConfig) -> Self {
        Self {
            core: StageCore::new(ctx, "AvailableDependency"),
            config: Cell::new(config),
        }
    }

    /// Current settings.
    pub fn config(&self) -> AvailableDependencyConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut AvailableDependencyConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }
}

#[async_trait(?Send)]
impl Stage for AvailableDependency {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, _event: &Event) -> Outcome {
        if self.core.context().uniform() < self.config.get().availability {
            Ok(None)
        } else {
            Err(Failure::payload("fail"))
        }
    }
}

/// Settings of a [`TimedDependency`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimedDependencyConfig {
    /// Mean latency of a successful call.
    pub mean: f64,
    /// Standard deviation of a successful call's latency.
    pub std: f64,
    /// Mean latency of a failing call.
    pub error_mean: f64,
    /// Standard deviation of a failing call's latency.
    pub error_std: f64,
    /// Probability that a call succeeds.
    pub availability: f64,
}

impl Default for TimedDependencyConfig {
    fn default() -> Self {
        Self {
            mean: 150.0,
            std: 25.0,
            error_mean: 150.0,
            error_std: 25.0,
            availability: 0.9995,
        }
    }
}

/// Succeeds with a fixed probability after a normally distributed latency.
#[derive(Debug)]
pub struct TimedDependency {
    core: StageCore,
    config: Cell<TimedDependencyConfig>,
    concurrent: Cell<usize>,
}

impl TimedDependency {
    /// Dependency with default settings.
    pub fn new(ctx: &SimContext) -> Self {
        Self::with_config(ctx, TimedDependencyConfig::default())
    }

    /// Dependency with the given settings.
    pub fn with_config(ctx: &SimContext, config: TimedDependencyConfig) -> Self {
        Self {
            core: StageCore::new(ctx, "TimedDependency"),
            config: Cell::new(config),
            concurrent: Cell::new(0),
        }
    }

    /// Current settings.
    pub fn config(&self) -> TimedDependencyConfig {
        self.config.get()
    }

    /// Changes settings in place.
    pub fn configure(&self, update: impl FnOnce(&mut TimedDependencyConfig)) {
        let mut config = self.config.get();
        update(&mut config);
        self.config.set(config);
    }

    /// Calls currently waiting out their latency.
    pub fn concurrent(&self) -> usize {
        self.concurrent.get()
    }
}

#[async_trait(?Send)]
impl Stage for TimedDependency {
    fn core(&self) -> &StageCore {
        &self.core
    }

    async fn work_on(&self, _event: &Event) -> Outcome {
        let config = self.config.get();
        let ctx = self.core.context();
        let in_flight = InFlight::enter(&self.concurrent);

        let available = ctx.uniform() < config.availability;
        let latency = if available {
            ctx.normal(config.mean, config.std)
        } else {
            ctx.normal(config.error_mean, config.error_std)
        };
        let waited = ctx.clock().wait(u64::try_from(latency).unwrap_or(0)).await;
        drop(in_flight);
        waited?;

        if available {
            Ok(None)
        } else {
            Err(Failure::payload("fail"))
        }
    }
}
