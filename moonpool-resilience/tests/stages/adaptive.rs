//! Adaptive circuit breaker resizing a worker pool.

use std::rc::Rc;

use moonpool_resilience::{
    stages::{AdaptiveCircuitBreaker, AdaptiveConfig},
    PoolQueue, ServiceQueue, SimContext, Stage,
};

use crate::support::{accept, advance, send_traffic, ReplayDependency};

struct Fixture {
    ctx: SimContext,
    breaker: Rc<AdaptiveCircuitBreaker>,
    dependency: Rc<ReplayDependency>,
    queue: Rc<PoolQueue>,
}

fn fixture() -> Fixture {
    let ctx = SimContext::new();
    let dependency = Rc::new(ReplayDependency::new(&ctx));
    let breaker = Rc::new(AdaptiveCircuitBreaker::with_config(
        &ctx,
        dependency.clone(),
        AdaptiveConfig {
            capacity: 4,
            decrease_step: 0.05,
            increase_step: 0.01,
            ..AdaptiveConfig::default()
        },
    ));
    let queue = Rc::new(PoolQueue::fifo(100, 100));
    breaker.set_queue_to_scale(queue.clone());
    Fixture {
        ctx,
        breaker,
        dependency,
        queue,
    }
}

/// Sends each outcome as its own event, one tick apart.
fn send_one_by_one(f: &Fixture, outcomes: &[bool]) {
    f.dependency.replay(outcomes);
    for _ in outcomes {
        let _ = accept(&f.ctx, &f.breaker, "first");
        advance(&f.ctx, 1);
    }
}

fn assert_scale(breaker: &AdaptiveCircuitBreaker, expected: f64) {
    let scale = breaker.scale();
    assert!((scale - expected).abs() < 1e-9, "scale {scale} != {expected}");
}

#[test]
fn test_every_failure_past_a_full_ring_scales_down() {
    let f = fixture();

    send_one_by_one(&f, &[false; 10]);

    assert_eq!(f.ctx.stats().get("acb.decrease"), 7.0);
    assert_eq!(f.ctx.stats().get("acb.increase"), 0.0);
    assert_scale(&f.breaker, 0.65);
    let expected = (100.0 * f.breaker.scale()).ceil() as usize;
    assert_eq!(f.queue.num_workers(), expected);
    assert_eq!(f.breaker.ring(), vec![1, 1, 1, 1]);
}

#[test]
fn test_never_rejects_while_failing() {
    let f = fixture();

    send_one_by_one(&f, &[false; 10]);

    assert_eq!(f.dependency.calls(), 10);
    assert_eq!(f.breaker.traffic().rejected, 0);
}

#[test]
fn test_scales_back_up_slowly() {
    let f = fixture();
    send_one_by_one(&f, &[false; 4]);
    assert_scale(&f.breaker, 0.95);

    send_one_by_one(&f, &[true; 10]);

    // The first two successes still leave the ring above threshold.
    assert_eq!(f.ctx.stats().get("acb.decrease"), 3.0);
    assert_eq!(f.ctx.stats().get("acb.increase"), 8.0);
    assert_scale(&f.breaker, 0.93);
    assert_eq!(f.breaker.ring(), vec![0, 0, 0, 0]);
}

/// The scale never drops below `min_scale`, and at least one worker stays.
#[test]
fn test_scale_is_clamped() {
    let f = fixture();
    f.breaker.configure(|config| {
        config.decrease_step = 2.0;
        config.min_scale = 0.001;
    });
    f.dependency.replay(&[false; 4]);

    send_traffic(&f.ctx, &f.breaker, 4);

    assert_eq!(f.breaker.scale(), 0.001);
    assert_eq!(f.queue.num_workers(), 1);
}

#[test]
fn test_scale_is_one_without_queue() {
    let ctx = SimContext::new();
    let dependency = Rc::new(ReplayDependency::new(&ctx));
    let breaker = Rc::new(AdaptiveCircuitBreaker::new(&ctx, dependency.clone()));
    dependency.replay(&[false; 10]);

    send_traffic(&ctx, &breaker, 10);

    assert_eq!(breaker.scale(), 1.0);
    assert_eq!(breaker.failure_rate(), Some(1.0));
    assert_eq!(ctx.stats().get("acb.decrease"), 0.0);
    assert_eq!(breaker.config().capacity, 10);
}
