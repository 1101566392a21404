//! The traffic-generating simulation driver.

use std::{cell::RefCell, rc::Rc};

use moonpool_resilience::{
    stages::{AvailableDependency, AvailableDependencyConfig, TimedDependency, TimedDependencyConfig},
    Event, PoolQueue, ServiceQueue, SimContext, Simulation, SimulationConfig, SimulationError,
    Stage,
};

use crate::support::{init_tracing, Inspect, TimedWork};

fn always_available(ctx: &SimContext) -> Rc<AvailableDependency> {
    Rc::new(AvailableDependency::with_config(
        ctx,
        AvailableDependencyConfig { availability: 1.0 },
    ))
}

/// A run returns exactly the requested number of completed events.
#[test]
fn test_run_returns_every_event() {
    init_tracing();
    let ctx = SimContext::with_seed(7);
    let simulation = Simulation::new(&ctx);

    let events = simulation.run(always_available(&ctx), 25).unwrap();

    assert_eq!(events.len(), 25);
    assert!(events
        .iter()
        .all(|event| event.response().is_some_and(|response| response.is_success())));
    let ids: Vec<u64> = events.iter().map(Event::id).collect();
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());
    assert_eq!(simulation.events_sent(), 25);
    assert_eq!(simulation.arrival_rate(), 0.0);
    assert!(!simulation.is_running());
}

/// Events arrive every 1000 / rate ticks and keys follow the key space.
#[test]
fn test_arrival_spacing_and_keys() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);

    let events = simulation.run(always_available(&ctx), 4).unwrap();

    let starts: Vec<u64> = events.iter().map(|event| event.timing().start).collect();
    assert_eq!(starts, vec![0, 20, 40, 60]);
    assert!(events.iter().all(|event| event.key().starts_with("e-")));
    assert!(events.iter().all(|event| event.timing().latency() == 0));
}

/// Rates above 1000 send several events per tick.
#[test]
fn test_high_rate_sends_several_per_tick() {
    let ctx = SimContext::new();
    let simulation = Simulation::with_config(
        &ctx,
        SimulationConfig {
            events_per_1000_ticks: 2000.0,
            ..SimulationConfig::default()
        },
    );

    let events = simulation.run(always_available(&ctx), 6).unwrap();

    let starts: Vec<u64> = events.iter().map(|event| event.timing().start).collect();
    assert_eq!(starts, vec![0, 1, 1, 2, 2, 3]);
}

/// Sending zero events returns right away without touching the clock.
#[test]
fn test_zero_events_is_a_no_op() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);

    assert!(simulation.run(always_available(&ctx), 0).unwrap().is_empty());
    assert_eq!(ctx.clock().now(), 0);
}

/// A non-positive arrival rate is refused.
#[test]
fn test_invalid_rate_is_refused() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    simulation.configure(|config| config.events_per_1000_ticks = -5.0);

    let err = simulation.run(always_available(&ctx), 3).unwrap_err();
    assert!(matches!(err, SimulationError::InvalidState(_)));
    assert!(!simulation.is_running());
}

/// Each run resets the driver's counters, the event ids and the stats sink.
#[test]
fn test_runs_reset_counters() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    ctx.stats().add("leftover", 1.0);

    simulation.run(always_available(&ctx), 10).unwrap();
    assert_eq!(ctx.stats().get("leftover"), 0.0);

    let events = simulation.run(always_available(&ctx), 5).unwrap();
    assert_eq!(simulation.events_sent(), 5);
    assert_eq!(events[0].id(), 1);
}

/// The arrival rate is visible while events are being sent.
#[test]
fn test_arrival_rate_is_visible_during_run() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    let observed = Rc::new(RefCell::new(Vec::new()));
    let inspect = {
        let simulation = simulation.clone();
        let observed = Rc::clone(&observed);
        Rc::new(Inspect::new(&ctx, move || {
            observed.borrow_mut().push(simulation.arrival_rate())
        }))
    };

    simulation.run(inspect, 3).unwrap();

    let observed = observed.borrow();
    assert_eq!(observed.len(), 3);
    assert_eq!(observed[..2], [50.0, 50.0]);
    assert_eq!(simulation.arrival_rate(), 0.0);
}

/// A nested run is refused while another one is active.
#[test]
fn test_nested_run_is_refused() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    let nested = Rc::new(RefCell::new(None));
    let inspect = {
        let simulation = simulation.clone();
        let nested = Rc::clone(&nested);
        let inner_ctx = ctx.clone();
        Rc::new(Inspect::new(&ctx, move || {
            let result = simulation.run(always_available(&inner_ctx), 1);
            *nested.borrow_mut() = Some(result);
        }))
    };

    simulation.run(inspect, 1).unwrap();

    let nested = nested.borrow_mut().take().expect("inspect ran");
    assert_eq!(nested.unwrap_err(), SimulationError::AlreadyRunning);
}

/// A timed run returns every created event, in-flight ones without a response.
#[test]
fn test_run_for_ticks_reports_in_flight_events() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    let stage = Rc::new(TimedWork::fixed(&ctx, 50));

    let events = simulation.run_for_ticks(stage, 100).unwrap();

    let starts: Vec<u64> = events.iter().map(|event| event.timing().start).collect();
    assert_eq!(starts, vec![0, 20, 40, 60, 80]);
    let completed = events.iter().filter(|event| event.response().is_some()).count();
    assert_eq!(completed, 3);
    assert_eq!(ctx.clock().now(), 100);
    assert_eq!(simulation.arrival_rate(), 0.0);
}

/// Events cut off by a timed run give their workers back, so a later run on
/// the same queue gets the full pool.
#[test]
fn test_run_for_ticks_releases_workers_of_in_flight_events() {
    let ctx = SimContext::new();
    let simulation = Simulation::new(&ctx);
    let queue = Rc::new(PoolQueue::fifo(0, 2));
    let slow = Rc::new(TimedWork::fixed(&ctx, 500));
    slow.core().set_queue(queue.clone());

    let events = simulation.run_for_ticks(slow, 50).unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(queue.working(), 0);
    assert_eq!(ctx.clock().parked(), 0);

    let fast = Rc::new(TimedWork::fixed(&ctx, 5));
    fast.core().set_queue(queue.clone());
    let events = simulation.run(fast, 4).unwrap();

    let succeeded = events
        .iter()
        .filter(|event| event.response().is_some_and(|response| response.is_success()))
        .count();
    assert_eq!(succeeded, 4);
    assert_eq!(queue.working(), 0);
}

/// Same seed, same run.
#[test]
fn test_seeded_runs_are_reproducible() {
    fn run(seed: u64) -> Vec<(String, bool, u64)> {
        let ctx = SimContext::with_seed(seed);
        let dependency = Rc::new(TimedDependency::with_config(
            &ctx,
            TimedDependencyConfig {
                availability: 0.5,
                ..TimedDependencyConfig::default()
            },
        ));
        Simulation::new(&ctx)
            .run(dependency, 50)
            .unwrap()
            .into_iter()
            .map(|event| {
                let success = event.response().is_some_and(|response| response.is_success());
                (event.key().to_string(), success, event.timing().latency())
            })
            .collect()
    }

    assert_eq!(run(42), run(42));
}
