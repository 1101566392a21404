//! Traffic generator driving events into a root stage.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::{
    clock::{TaskHandle, Tick},
    context::SimContext,
    error::{SimulationError, SimulationResult},
    event::Event,
    stage::Stage,
};

/// Arrival process and key distribution of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Arrival rate. Changes take effect on the next arrival tick.
    pub events_per_1000_ticks: f64,
    /// Mean of the normally distributed event keys.
    pub keyspace_mean: f64,
    /// Standard deviation of the event keys.
    pub keyspace_std: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            events_per_1000_ticks: 50.0,
            keyspace_mean: 1000.0,
            keyspace_std: 50.0,
        }
    }
}

struct SimulationInner {
    ctx: SimContext,
    config: Cell<SimulationConfig>,
    arrival_rate: Cell<f64>,
    events_sent: Cell<u64>,
    running: Cell<bool>,
}

/// Sends events into a stage at a configured rate and collects them.
///
/// Only one run may be active at a time. A run resets the driver's counters
/// and the statistics sink, but not the clock: consecutive runs continue
/// from the tick the previous one ended at.
#[derive(Clone)]
pub struct Simulation {
    inner: Rc<SimulationInner>,
}

impl Simulation {
    /// Driver with default settings.
    pub fn new(ctx: &SimContext) -> Self {
        Self::with_config(ctx, SimulationConfig::default())
    }

    /// Driver with the given settings.
    pub fn with_config(ctx: &SimContext, config: SimulationConfig) -> Self {
        Self {
            inner: Rc::new(SimulationInner {
                ctx: ctx.clone(),
                config: Cell::new(config),
                arrival_rate: Cell::new(0.0),
                events_sent: Cell::new(0),
                running: Cell::new(false),
            }),
        }
    }

    /// Current settings.
    pub fn config(&self) -> SimulationConfig {
        self.inner.config.get()
    }

    /// Changes settings in place, also while a run is active.
    pub fn configure(&self, update: impl FnOnce(&mut SimulationConfig)) {
        let mut config = self.inner.config.get();
        update(&mut config);
        self.inner.config.set(config);
    }

    /// Zeroes the arrival rate, the sent counter and the event ids.
    pub fn reset(&self) {
        self.inner.arrival_rate.set(0.0);
        self.inner.events_sent.set(0);
        self.inner.ctx.reset_event_ids();
    }

    /// Rate currently being generated, 0 when no events are being sent.
    pub fn arrival_rate(&self) -> f64 {
        self.inner.arrival_rate.get()
    }

    /// Events sent by the current or last run.
    pub fn events_sent(&self) -> u64 {
        self.inner.events_sent.get()
    }

    /// Returns `true` while a run is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Sends `n` events into `stage` and returns them once every one of them
    /// has a response.
    #[instrument(skip(self, stage), fields(stage = stage.name()))]
    pub fn run(&self, stage: Rc<dyn Stage>, n: usize) -> SimulationResult<Vec<Event>> {
        let _running = RunningGuard::acquire(&self.inner.running)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        self.prepare()?;

        let clock = self.inner.ctx.clock().clone();
        let driver = self.clone();
        let events = clock.block_on(async move { driver.send_events(stage, n).await })??;
        clock.stop(true);

        debug!(events = events.len(), tick = clock.now(), "simulation finished");
        Ok(events)
    }

    /// Sends events into `stage` for `ticks` ticks, then stops the clock.
    ///
    /// Returns every event created. Events still in flight when time runs
    /// out carry no response.
    #[instrument(skip(self, stage), fields(stage = stage.name()))]
    pub fn run_for_ticks(&self, stage: Rc<dyn Stage>, ticks: Tick) -> SimulationResult<Vec<Event>> {
        let _running = RunningGuard::acquire(&self.inner.running)?;
        if ticks == 0 {
            return Ok(Vec::new());
        }
        self.prepare()?;

        let clock = self.inner.ctx.clock().clone();
        let created = Rc::new(RefCell::new(Vec::new()));
        let driver = self.clone();
        let sink = Rc::clone(&created);
        let mut sender =
            clock.spawn(async move { driver.send_for_ticks(stage, ticks, sink).await })?;

        let outcome = clock.start(Some(ticks))?;
        let finished = sender.is_finished();
        // Drops the events still in flight, releasing their workers.
        clock.stop(true);
        if finished {
            if let Some(sent) = sender.try_take()? {
                sent?;
            }
        }

        let events = std::mem::take(&mut *created.borrow_mut());
        debug!(events = events.len(), ?outcome, tick = clock.now(), "timed simulation finished");
        Ok(events)
    }

    fn prepare(&self) -> SimulationResult<()> {
        self.checked_rate()?;
        self.reset();
        self.inner.ctx.stats().reset();
        debug!(config = ?self.config(), tick = self.inner.ctx.clock().now(), "simulation started");
        Ok(())
    }

    fn checked_rate(&self) -> SimulationResult<f64> {
        let rate = self.inner.config.get().events_per_1000_ticks;
        if rate.is_finite() && rate > 0.0 {
            Ok(rate)
        } else {
            Err(SimulationError::InvalidState(format!(
                "arrival rate must be positive, got {rate}"
            )))
        }
    }

    async fn send_events(&self, stage: Rc<dyn Stage>, n: usize) -> SimulationResult<Vec<Event>> {
        let clock = self.inner.ctx.clock().clone();
        let mut pending = Vec::with_capacity(n);
        let mut time = 0.0;
        let mut virtual_time = 0.0;

        'arrivals: loop {
            let delta = self.arrival_tick()?;
            while virtual_time <= time {
                virtual_time += delta;
                pending.push(self.dispatch(&stage)?);
                if pending.len() >= n {
                    break 'arrivals;
                }
            }
            clock.wait(1).await?;
            time += 1.0;
        }
        self.inner.arrival_rate.set(0.0);
        trace!(sent = pending.len(), tick = clock.now(), "all events sent");

        join_all(pending).await.into_iter().collect()
    }

    async fn send_for_ticks(
        &self,
        stage: Rc<dyn Stage>,
        ticks: Tick,
        created: Rc<RefCell<Vec<Event>>>,
    ) -> SimulationResult<()> {
        let clock = self.inner.ctx.clock().clone();
        let mut time = 0.0;
        let mut virtual_time = 0.0;
        let mut elapsed: Tick = 0;

        loop {
            let delta = self.arrival_tick()?;
            while virtual_time <= time {
                virtual_time += delta;
                let event = self.create_event();
                created.borrow_mut().push(event.clone());
                // In-flight events are reported as they are, so the handle is not kept.
                let _call = self.send(&stage, event)?;
            }
            elapsed += 1;
            if elapsed >= ticks {
                break;
            }
            clock.wait(1).await?;
            time += 1.0;
        }
        self.inner.arrival_rate.set(0.0);
        Ok(())
    }

    /// Publishes the rate for this arrival tick and returns the gap between
    /// arrivals.
    fn arrival_tick(&self) -> SimulationResult<f64> {
        let rate = self.checked_rate()?;
        self.inner.arrival_rate.set(rate);
        Ok(1000.0 / rate)
    }

    fn create_event(&self) -> Event {
        let ctx = &self.inner.ctx;
        let config = self.inner.config.get();
        let key = format!("e-{}", ctx.normal(config.keyspace_mean, config.keyspace_std));
        self.inner.events_sent.set(self.inner.events_sent.get() + 1);
        Event::new(ctx, key)
    }

    fn dispatch(&self, stage: &Rc<dyn Stage>) -> SimulationResult<TaskHandle<Event>> {
        let event = self.create_event();
        self.send(stage, event)
    }

    fn send(&self, stage: &Rc<dyn Stage>, event: Event) -> SimulationResult<TaskHandle<Event>> {
        let stage = Rc::clone(stage);
        let clock = self.inner.ctx.clock().downgrade();
        self.inner.ctx.clock().spawn(async move {
            let outcome = stage.accept(&event).await;
            if let Ok(now) = clock.now() {
                event.complete(&outcome, now);
            }
            event
        })
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.inner.config.get())
            .field("arrival_rate", &self.inner.arrival_rate.get())
            .field("events_sent", &self.inner.events_sent.get())
            .field("running", &self.inner.running.get())
            .finish_non_exhaustive()
    }
}

/// Holds the single-run flag for the guard's lifetime.
struct RunningGuard<'a> {
    running: &'a Cell<bool>,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Cell<bool>) -> SimulationResult<Self> {
        if running.replace(true) {
            return Err(SimulationError::AlreadyRunning);
        }
        Ok(Self { running })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.set(false);
    }
}
