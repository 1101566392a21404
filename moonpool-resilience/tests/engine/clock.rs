//! Integration tests for the virtual clock.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use moonpool_resilience::{Clock, ClockConfig, RunOutcome, SimContext, SimulationError};

use crate::support::init_tracing;

/// A bounded run processes exactly the requested ticks and ends at the deadline.
#[test]
fn test_bounded_run_stops_at_deadline() {
    init_tracing();
    let clock = Clock::new();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    clock.schedule_repeating(1, move || counter.set(counter.get() + 1));

    assert_eq!(clock.start(Some(10)).unwrap(), RunOutcome::Exhausted);
    assert_eq!(clock.now(), 10);
    assert_eq!(fired.get(), 9, "ticks 1..=9 fire, tick 10 is not processed");
}

/// A second run continues from where the first one ended.
#[test]
fn test_consecutive_runs_continue_the_timeline() {
    let clock = Clock::new();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    clock.schedule_repeating(1, move || counter.set(counter.get() + 1));

    clock.start(Some(10)).unwrap();
    assert_eq!(clock.start(Some(5)).unwrap(), RunOutcome::Exhausted);
    assert_eq!(clock.now(), 15);
    assert_eq!(fired.get(), 14);
}

/// Callbacks due at the same tick fire in registration order.
#[test]
fn test_same_tick_callbacks_fire_in_registration_order() {
    let clock = Clock::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for (delay, label) in [(3, "first"), (3, "second"), (2, "earlier"), (3, "third")] {
        let order = Rc::clone(&order);
        clock.schedule_after(delay, move || order.borrow_mut().push(label));
    }

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Idle);
    assert_eq!(*order.borrow(), vec!["earlier", "first", "second", "third"]);
    assert_eq!(clock.now(), 3);
}

/// Stopping keeps unfired callbacks; the next run picks them up.
#[test]
fn test_stop_keeps_pending_callbacks() {
    let clock = Clock::new();
    let stopper = clock.clone();
    clock.schedule_after(5, move || stopper.stop(false));
    let fired_at = Rc::new(Cell::new(None));
    let slot = Rc::clone(&fired_at);
    let observer = clock.clone();
    clock.schedule_after(8, move || slot.set(Some(observer.now())));

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Stopped);
    assert_eq!(clock.now(), 5);
    assert_eq!(clock.pending(), 1);

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Idle);
    assert_eq!(fired_at.get(), Some(8));
}

/// Stopping with `clear_pending` discards every unfired callback.
#[test]
fn test_stop_can_discard_pending_callbacks() {
    let clock = Clock::new();
    let stopper = clock.clone();
    clock.schedule_after(5, move || stopper.stop(true));
    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    clock.schedule_after(8, move || flag.set(true));

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Stopped);
    assert_eq!(clock.pending(), 0);
    assert_eq!(clock.start(None).unwrap(), RunOutcome::Idle);
    assert!(!fired.get());
    assert_eq!(clock.now(), 5);
}

/// Speed mode jumps over idle ticks without skipping anything due.
#[test]
fn test_speed_mode_jumps_to_next_callback() {
    let ctx = SimContext::with_clock_config(ClockConfig {
        speed_mode: true,
        ..ClockConfig::default()
    });
    let clock = ctx.clock().clone();
    let seen = Rc::new(RefCell::new(Vec::new()));
    for delay in [1000, 500] {
        let seen = Rc::clone(&seen);
        let observer = clock.clone();
        clock.schedule_after(delay, move || seen.borrow_mut().push(observer.now()));
    }

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Idle);
    assert_eq!(*seen.borrow(), vec![500, 1000]);
    assert_eq!(clock.now(), 1000);
}

/// Speed mode can be toggled at runtime and never jumps past a deadline.
#[test]
fn test_speed_mode_respects_deadline() {
    let clock = Clock::new();
    clock.set_speed_mode(true);
    assert!(clock.config().speed_mode);
    clock.schedule_after(1000, || {});

    assert_eq!(clock.start(Some(100)).unwrap(), RunOutcome::Exhausted);
    assert_eq!(clock.now(), 100);
    assert_eq!(clock.pending(), 1);
}

/// Waiting suspends a task for exactly the requested ticks; zero counts as one.
#[test]
fn test_wait_resolves_after_requested_ticks() {
    let clock = Clock::new();
    let driver = clock.clone();

    let ticks = clock
        .block_on(async move {
            let mut seen = Vec::new();
            driver.wait(7).await?;
            seen.push(driver.now());
            driver.wait(0).await?;
            seen.push(driver.now());
            driver.wait_fractional(2.7).await?;
            seen.push(driver.now());
            Ok::<_, SimulationError>(seen)
        })
        .unwrap()
        .unwrap();

    assert_eq!(ticks, vec![7, 8, 10]);
}

/// Dropping a task handle does not cancel the task.
#[test]
fn test_dropped_task_handle_keeps_running() {
    let clock = Clock::new();
    let finished_at = Rc::new(Cell::new(None));
    let slot = Rc::clone(&finished_at);
    let worker = clock.clone();
    let handle = clock
        .spawn(async move {
            let _ = worker.wait(5).await;
            slot.set(Some(worker.now()));
        })
        .unwrap();
    assert!(!handle.is_finished());
    drop(handle);

    clock.block_on(clock.wait(10)).unwrap().unwrap();
    assert_eq!(finished_at.get(), Some(5));
}

/// A spawned task's output is delivered through its handle.
#[test]
fn test_task_handle_yields_output() {
    let clock = Clock::new();
    let worker = clock.clone();
    let handle = clock
        .spawn(async move {
            let _ = worker.wait(3).await;
            worker.now() * 2
        })
        .unwrap();

    assert_eq!(clock.block_on(handle).unwrap(), Ok(6));
}

/// Stopping while a future is being driven reports where it stopped.
#[test]
fn test_block_on_reports_stop() {
    let clock = Clock::new();
    let stopper = clock.clone();
    clock.schedule_after(3, move || stopper.stop(false));

    let err = clock.block_on(clock.wait(10)).unwrap_err();
    assert_eq!(err, SimulationError::Stopped { tick: 3 });
}

/// Reset rewinds to tick 0 and forgets pending callbacks.
#[test]
fn test_reset_rewinds_clock() {
    let clock = Clock::new();
    clock.schedule_after(4, || {});
    clock.schedule_after(40, || {});
    clock.start(Some(10)).unwrap();
    assert_eq!(clock.now(), 10);

    clock.reset();
    assert_eq!(clock.now(), 0);
    assert_eq!(clock.pending(), 0);
}

/// Sets its flag when dropped.
struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

fn spawn_sleeper(clock: &Clock, ticks: u64) -> Rc<Cell<bool>> {
    let dropped = Rc::new(Cell::new(false));
    let flag = DropFlag(Rc::clone(&dropped));
    let sleeper = clock.clone();
    clock
        .spawn(async move {
            let _flag = flag;
            let _ = sleeper.wait(ticks).await;
        })
        .unwrap();
    dropped
}

/// Stopping with `clear_pending` drops tasks that are still sleeping.
#[test]
fn test_stop_discards_spawned_tasks() {
    let clock = Clock::new();
    let dropped = spawn_sleeper(&clock, 10);
    clock.start(Some(3)).unwrap();
    assert!(!dropped.get());
    assert_eq!(clock.parked(), 1);

    clock.stop(true);

    assert!(dropped.get());
    assert_eq!(clock.parked(), 0);
    assert_eq!(clock.start(None).unwrap(), RunOutcome::Idle);
}

/// Reset drops spawned tasks along with pending callbacks.
#[test]
fn test_reset_discards_spawned_tasks() {
    let clock = Clock::new();
    let dropped = spawn_sleeper(&clock, 10);
    clock.start(Some(3)).unwrap();

    clock.reset();

    assert!(dropped.get());
    assert_eq!(clock.parked(), 0);
}

/// A task stopping the clock drops the other tasks once it yields.
#[test]
fn test_stop_from_a_task_discards_tasks_after_it_yields() {
    let clock = Clock::new();
    let dropped = spawn_sleeper(&clock, 10);
    let stopper = clock.clone();
    clock
        .spawn(async move {
            let _ = stopper.wait(2).await;
            stopper.stop(true);
        })
        .unwrap();

    assert_eq!(clock.start(None).unwrap(), RunOutcome::Stopped);
    assert!(dropped.get());
    assert_eq!(clock.parked(), 0);
    assert_eq!(clock.now(), 2);
}

/// Partial configuration documents fill in defaults.
#[test]
fn test_clock_config_defaults() {
    let config: ClockConfig = serde_json::from_str(r#"{"speed_mode": true}"#).unwrap();
    assert!(config.speed_mode);
    assert_eq!(config.watchdog_interval, Duration::from_secs(5));
}
