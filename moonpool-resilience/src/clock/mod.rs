//! Virtual clock and cooperative scheduler.
//!
//! The clock is the only source of time in a simulation. It owns a queue of
//! callbacks keyed by tick and a single-threaded executor for the tasks that
//! make up a run. Advancing one tick fires every callback due at the current
//! tick in registration order, then runs every task woken by them until none
//! can make progress, and only then moves time forward.

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::{Rc, Weak},
    task::Waker,
    time::{Duration, Instant},
};

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::{SimulationError, SimulationResult};

mod events;
mod sleep;
mod task;
mod wakers;

use events::{CallbackQueue, Scheduled, ScheduledEntry};
pub use sleep::SleepFuture;
pub use task::TaskHandle;
use wakers::SleepRegistry;

/// The unit of virtual time.
pub type Tick = u64;

/// Tunables for the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Jump straight to the next pending callback when nothing is due.
    pub speed_mode: bool,
    /// Real-time interval after which a tick that has not advanced is reported.
    pub watchdog_interval: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            speed_mode: false,
            watchdog_interval: Duration::from_secs(5),
        }
    }
}

/// Why [`Clock::start`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// [`Clock::stop`] was called.
    Stopped,
    /// The requested number of ticks elapsed.
    Exhausted,
    /// Nothing was left to schedule.
    Idle,
}

enum Drive {
    Finished,
    Halted(RunOutcome),
}

#[derive(Debug)]
struct ClockState {
    now: Tick,
    callbacks: CallbackQueue,
    next_sequence: u64,
    next_sleep_id: u64,
    sleeps: SleepRegistry,
    config: ClockConfig,
    stopped: bool,
}

impl ClockState {
    fn new(config: ClockConfig) -> Self {
        Self {
            now: 0,
            callbacks: CallbackQueue::default(),
            next_sequence: 0,
            next_sleep_id: 0,
            sleeps: SleepRegistry::default(),
            config,
            stopped: false,
        }
    }
}

#[derive(Debug)]
struct ClockShared {
    state: RefCell<ClockState>,
    pool: RefCell<LocalPool>,
    spawner: RefCell<LocalSpawner>,
    driving: Cell<bool>,
    discard_requested: Cell<bool>,
}

/// Handle to the virtual clock. Cloning shares the same timeline.
#[derive(Debug, Clone)]
pub struct Clock {
    shared: Rc<ClockShared>,
}

impl Clock {
    /// Creates a clock at tick 0 with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClockConfig::default())
    }

    /// Creates a clock at tick 0.
    pub fn with_config(config: ClockConfig) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            shared: Rc::new(ClockShared {
                state: RefCell::new(ClockState::new(config)),
                pool: RefCell::new(pool),
                spawner: RefCell::new(spawner),
                driving: Cell::new(false),
                discard_requested: Cell::new(false),
            }),
        }
    }

    /// Current tick.
    pub fn now(&self) -> Tick {
        self.shared.state.borrow().now
    }

    /// Snapshot of the configuration.
    pub fn config(&self) -> ClockConfig {
        self.shared.state.borrow().config.clone()
    }

    /// Enables or disables fast-forwarding over idle ticks.
    pub fn set_speed_mode(&self, enabled: bool) {
        self.shared.state.borrow_mut().config.speed_mode = enabled;
    }

    /// Number of callbacks and timers not yet fired.
    pub fn pending(&self) -> usize {
        self.shared.state.borrow().callbacks.len()
    }

    /// Number of sleeps waiting for their timer.
    pub fn parked(&self) -> usize {
        self.shared.state.borrow().sleeps.parked()
    }

    /// Returns `true` while a run loop owns the clock.
    pub fn is_running(&self) -> bool {
        self.shared.driving.get()
    }

    /// Creates a weak handle that does not keep the clock alive.
    pub fn downgrade(&self) -> WeakClock {
        WeakClock {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Runs `callback` once, `ticks` ticks from now. A delay of 0 counts as 1.
    pub fn schedule_after(&self, ticks: Tick, callback: impl FnOnce() + 'static) {
        self.schedule(ticks, Scheduled::Callback(Box::new(callback)));
    }

    /// Like [`schedule_after`](Self::schedule_after), flooring a fractional delay.
    pub fn schedule_after_fractional(&self, ticks: f64, callback: impl FnOnce() + 'static) {
        self.schedule_after(whole_ticks(ticks), callback);
    }

    /// Runs `callback` every `ticks` ticks, re-arming after each call.
    ///
    /// The repetition never ends on its own; it stops once pending callbacks
    /// are cleared or the clock is dropped.
    pub fn schedule_repeating(&self, ticks: Tick, callback: impl Fn() + 'static) {
        Self::arm_repeating(self.downgrade(), ticks, Rc::new(callback));
    }

    fn arm_repeating(clock: WeakClock, ticks: Tick, callback: Rc<dyn Fn()>) {
        let Ok(strong) = clock.upgrade() else {
            return;
        };
        strong.schedule_after(ticks, move || {
            callback();
            Self::arm_repeating(clock, ticks, callback);
        });
    }

    /// Returns a future that resolves `ticks` ticks from now. A wait of 0 counts as 1.
    pub fn wait(&self, ticks: Tick) -> SleepFuture {
        let sleep_id = {
            let mut state = self.shared.state.borrow_mut();
            let sleep_id = state.next_sleep_id;
            state.next_sleep_id += 1;
            state.sleeps.register(sleep_id);
            sleep_id
        };
        self.schedule(ticks, Scheduled::Timer { sleep_id });
        SleepFuture::new(self.downgrade(), sleep_id)
    }

    /// Like [`wait`](Self::wait), flooring a fractional tick count with a warning.
    pub fn wait_fractional(&self, ticks: f64) -> SleepFuture {
        self.wait(whole_ticks(ticks))
    }

    fn schedule(&self, ticks: Tick, work: Scheduled) {
        let mut state = self.shared.state.borrow_mut();
        let tick = state.now.saturating_add(ticks.max(1));
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .callbacks
            .schedule(ScheduledEntry::new(tick, work, sequence));
    }

    pub(crate) fn poll_sleep(&self, sleep_id: u64, waker: &Waker) -> bool {
        self.shared
            .state
            .borrow_mut()
            .sleeps
            .poll_fired(sleep_id, waker)
    }

    pub(crate) fn cancel_sleep(&self, sleep_id: u64) {
        if let Ok(mut state) = self.shared.state.try_borrow_mut() {
            state.sleeps.cancel(sleep_id);
        }
    }

    /// Spawns a task on the clock's executor.
    ///
    /// The task first runs the next time the clock drains ready work, within
    /// the current tick when called from inside a run.
    pub fn spawn<F>(&self, future: F) -> SimulationResult<TaskHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (sender, receiver) = futures::channel::oneshot::channel();
        let finished = Rc::new(Cell::new(false));
        let flag = Rc::clone(&finished);
        self.shared
            .spawner
            .borrow()
            .spawn_local(async move {
                let output = future.await;
                flag.set(true);
                let _ = sender.send(output);
            })
            .map_err(|_| SimulationError::SimulationShutdown)?;
        Ok(TaskHandle::new(receiver, finished))
    }

    /// Advances time until stopped, until `max_ticks` ticks elapsed, or until
    /// nothing is left to schedule.
    #[instrument(skip(self))]
    pub fn start(&self, max_ticks: Option<Tick>) -> SimulationResult<RunOutcome> {
        match self.drive(max_ticks, || false)? {
            Drive::Finished => Ok(RunOutcome::Idle),
            Drive::Halted(outcome) => Ok(outcome),
        }
    }

    /// Drives the clock until `future` completes and returns its output.
    #[instrument(skip_all)]
    pub fn block_on<F>(&self, future: F) -> SimulationResult<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let mut handle = self.spawn(future)?;
        let finished = handle.finished_flag();
        match self.drive(None, move || finished.get())? {
            Drive::Finished => handle.try_take()?.ok_or_else(|| {
                SimulationError::InvalidState("finished task produced no output".to_string())
            }),
            Drive::Halted(RunOutcome::Stopped) => Err(SimulationError::Stopped { tick: self.now() }),
            Drive::Halted(RunOutcome::Idle) => Err(SimulationError::Stalled {
                tick: self.now(),
                parked: self.parked(),
            }),
            Drive::Halted(RunOutcome::Exhausted) => Err(SimulationError::InvalidState(
                "unbounded run reported exhausted ticks".to_string(),
            )),
        }
    }

    /// Halts advancement. With `clear_pending`, unfired callbacks are
    /// discarded and every spawned task is dropped, so whatever a task holds
    /// (workers, sleeps, counters) is released.
    #[instrument(skip(self))]
    pub fn stop(&self, clear_pending: bool) {
        let discarded = {
            let mut state = self.shared.state.borrow_mut();
            state.stopped = true;
            clear_pending.then(|| std::mem::take(&mut state.callbacks))
        };
        // Callbacks may own sleeps, drop them outside the borrow.
        drop(discarded);
        if clear_pending {
            self.discard_tasks();
        }
    }

    /// Rewinds to tick 0, discarding every pending callback and spawned task.
    #[instrument(skip(self))]
    pub fn reset(&self) {
        let discarded = {
            let mut state = self.shared.state.borrow_mut();
            state.now = 0;
            state.stopped = false;
            std::mem::take(&mut state.callbacks)
        };
        drop(discarded);
        self.discard_tasks();
        debug!("clock reset");
    }

    /// Swaps in an empty executor and drops the old one with its tasks.
    ///
    /// From inside a task the executor is busy, so the swap is left to the
    /// run loop once the task yields.
    fn discard_tasks(&self) {
        let fresh = LocalPool::new();
        let spawner = fresh.spawner();
        let old = match self.shared.pool.try_borrow_mut() {
            Ok(mut pool) => std::mem::replace(&mut *pool, fresh),
            Err(_) => {
                self.shared.discard_requested.set(true);
                return;
            }
        };
        *self.shared.spawner.borrow_mut() = spawner;
        self.shared.discard_requested.set(false);
        drop(old);
        self.shared.state.borrow_mut().sleeps.clear();
        trace!("discarded spawned tasks");
    }

    fn drive(&self, max_ticks: Option<Tick>, finished: impl Fn() -> bool) -> SimulationResult<Drive> {
        let _guard = DriveGuard::acquire(&self.shared)?;
        let start = self.now();
        let deadline = max_ticks.map(|ticks| start.saturating_add(ticks));
        if deadline == Some(start) {
            return Ok(Drive::Halted(RunOutcome::Exhausted));
        }
        let mut watchdog = Watchdog::new(start, self.shared.state.borrow().config.watchdog_interval);

        loop {
            self.fire_due();
            self.run_ready()?;

            if finished() {
                return Ok(Drive::Finished);
            }

            let mut state = self.shared.state.borrow_mut();
            if state.stopped {
                debug!(tick = state.now, "clock stopped");
                return Ok(Drive::Halted(RunOutcome::Stopped));
            }
            watchdog.check(state.now, state.callbacks.len());

            let Some(earliest) = state.callbacks.earliest_tick() else {
                debug!(tick = state.now, parked = state.sleeps.parked(), "clock idle");
                return Ok(Drive::Halted(RunOutcome::Idle));
            };
            let next = if state.config.speed_mode {
                earliest.max(state.now + 1)
            } else {
                state.now + 1
            };
            if let Some(deadline) = deadline {
                if next >= deadline {
                    state.now = deadline;
                    return Ok(Drive::Halted(RunOutcome::Exhausted));
                }
            }
            trace!(from = state.now, to = next, "advancing clock");
            state.now = next;
        }
    }

    fn fire_due(&self) {
        loop {
            let entry = {
                let mut state = self.shared.state.borrow_mut();
                let now = state.now;
                state.callbacks.pop_due(now)
            };
            let Some(entry) = entry else {
                return;
            };
            match entry.into_work() {
                Scheduled::Timer { sleep_id } => {
                    let waker = self.shared.state.borrow_mut().sleeps.fire(sleep_id);
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                }
                Scheduled::Callback(callback) => callback(),
            }
        }
    }

    fn run_ready(&self) -> SimulationResult<()> {
        let mut pool = self
            .shared
            .pool
            .try_borrow_mut()
            .map_err(|_| SimulationError::AlreadyRunning)?;
        pool.run_until_stalled();
        drop(pool);
        if self.shared.discard_requested.get() {
            self.discard_tasks();
        }
        Ok(())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Floors a fractional tick count, warning when rounding was needed.
pub fn whole_ticks(ticks: f64) -> Tick {
    if ticks.fract() != 0.0 {
        warn!(
            ticks,
            rounded = ticks.floor(),
            "non-integer tick count will be rounded down"
        );
    }
    if ticks.is_finite() && ticks > 0.0 {
        ticks.floor() as Tick
    } else {
        0
    }
}

/// Marks the clock as owned by one run loop for the guard's lifetime.
struct DriveGuard<'a> {
    shared: &'a ClockShared,
}

impl<'a> DriveGuard<'a> {
    fn acquire(shared: &'a ClockShared) -> SimulationResult<Self> {
        if shared.driving.replace(true) {
            return Err(SimulationError::AlreadyRunning);
        }
        shared.state.borrow_mut().stopped = false;
        Ok(Self { shared })
    }
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.shared.driving.set(false);
    }
}

/// Reports ticks that stall in real time while callbacks are pending.
struct Watchdog {
    interval: Duration,
    last_check: Instant,
    last_tick: Tick,
}

impl Watchdog {
    fn new(tick: Tick, interval: Duration) -> Self {
        Self {
            interval,
            last_check: Instant::now(),
            last_tick: tick,
        }
    }

    fn check(&mut self, tick: Tick, pending: usize) {
        if self.last_check.elapsed() < self.interval {
            return;
        }
        if tick == self.last_tick && pending > 0 {
            warn!(
                tick,
                pending,
                interval = ?self.interval,
                "clock has not advanced despite pending callbacks"
            );
        }
        self.last_tick = tick;
        self.last_check = Instant::now();
    }
}

/// Weak handle to a [`Clock`].
#[derive(Debug, Clone)]
pub struct WeakClock {
    shared: Weak<ClockShared>,
}

impl WeakClock {
    /// Attempts to upgrade to a strong reference.
    pub fn upgrade(&self) -> SimulationResult<Clock> {
        self.shared
            .upgrade()
            .map(|shared| Clock { shared })
            .ok_or(SimulationError::SimulationShutdown)
    }

    /// Current tick, if the clock is still alive.
    pub fn now(&self) -> SimulationResult<Tick> {
        Ok(self.upgrade()?.now())
    }
}
