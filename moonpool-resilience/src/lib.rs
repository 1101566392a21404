//! # Moonpool Resilience
//!
//! Discrete-event simulation of resiliency techniques: admission control,
//! queueing with worker pools, retries, timeouts, circuit breaking and
//! caching, evaluated under synthetic traffic against dependencies with
//! configurable failure and latency profiles.
//!
//! ## Core Components
//!
//! - [`Clock`]: integer virtual time and the cooperative executor every
//!   logical flow runs on
//! - [`Stage`]: the pipeline contract; [`Stage::accept`] admits an event,
//!   obtains a worker from the stage's [`ServiceQueue`] and runs
//!   [`Stage::work_on`]
//! - [`stages`]: the resilience techniques, each wrapping another stage
//! - [`Simulation`]: generates traffic into a root stage
//! - [`SimContext`]: the clock, statistics sink and random source of one run
//!
//! ## Time Model
//!
//! Ticks are integers. Advancing one tick fires every callback due at the
//! current tick in registration order, then runs every ready task until it
//! suspends again. Nothing real-time is involved, so a run is reproducible
//! from its seed.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use moonpool_resilience::{
//!     stages::{Retry, TimedDependency},
//!     SimContext, Simulation,
//! };
//!
//! let ctx = SimContext::with_seed(42);
//! let dependency = Rc::new(TimedDependency::new(&ctx));
//! let retry = Rc::new(Retry::new(&ctx, dependency));
//! let events = Simulation::new(&ctx).run(retry, 10_000)?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Core Modules
// =============================================================================

/// Virtual clock, timers and the task executor.
pub mod clock;

/// Per-run shared state.
pub mod context;

/// Engine errors and stage failures.
pub mod error;

/// Events and their responses.
pub mod event;

/// Inbound queues and the workers they hand out.
pub mod queue;

/// Random number sources.
pub mod random;

/// Traffic generation.
pub mod simulation;

/// The stage contract.
pub mod stage;

/// Resilience techniques and dependency models.
pub mod stages;

/// Statistics records and the statistics sink.
pub mod stats;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use clock::{Clock, ClockConfig, RunOutcome, SleepFuture, TaskHandle, Tick, WeakClock};
pub use context::SimContext;
pub use error::{Failure, RejectReason, SimulationError, SimulationResult};
pub use event::{Event, Outcome, Payload, Response, ResponseKind};
pub use queue::{Discipline, EnqueueFuture, NoQueue, PoolQueue, ServiceQueue, Worker};
pub use random::{EntropyRandom, RandomSource, SeededRandom};
pub use simulation::{Simulation, SimulationConfig};
pub use stage::{Stage, StageCore, Wrapped};
pub use stats::{LineKind, ResponseTiming, Stats, TimeStats, TrafficStats};
