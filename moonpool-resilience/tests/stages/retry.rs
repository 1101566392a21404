//! Retry behaviour against a scripted dependency.

use std::rc::Rc;

use moonpool_resilience::{
    stages::{Retry, RetryConfig},
    Failure, SimContext, Stage,
};

use crate::support::{accept, ReplayDependency};

fn retry_over(ctx: &SimContext, attempts: u32) -> (Rc<Retry>, Rc<ReplayDependency>) {
    let dependency = Rc::new(ReplayDependency::new(ctx));
    let retry = Rc::new(Retry::with_config(
        ctx,
        dependency.clone(),
        RetryConfig { attempts },
    ));
    (retry, dependency)
}

#[test]
fn test_does_not_retry_on_success() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 2);
    dependency.replay(&[true, true]);

    assert!(accept(&ctx, &retry, "first").is_ok());
    assert_eq!(dependency.calls(), 1);
}

#[test]
fn test_retries_on_fail() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 2);
    dependency.replay(&[false, true]);

    assert_eq!(accept(&ctx, &retry, "first"), Ok(Some("success".to_string())));
    assert_eq!(dependency.calls(), 2);
}

#[test]
fn test_does_not_retry_more_than_attempts() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 2);
    dependency.replay(&[false, false, false]);

    let outcome = accept(&ctx, &retry, "first");

    assert_eq!(outcome, Err(Failure::Exhausted { attempts: 2 }));
    assert_eq!(dependency.calls(), 2);
}

#[test]
fn test_returns_the_latest_attempt_result() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 3);
    dependency.replay(&[false, false, true]);

    assert!(accept(&ctx, &retry, "first").is_ok());
    assert_eq!(dependency.calls(), 3);
}

#[test]
fn test_preserves_success_payload() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 2);
    dependency.replay_with(&[true], "custom-success", "custom-fail");

    assert_eq!(
        accept(&ctx, &retry, "first"),
        Ok(Some("custom-success".to_string()))
    );
}

/// Exhaustion reports a generic payload, not the last attempt's.
#[test]
fn test_replaces_fail_payload() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 2);
    dependency.replay_with(&[false, false, false], "custom-success", "custom-fail");

    let failure = accept(&ctx, &retry, "first").expect_err("every attempt fails");
    assert_eq!(failure.message(), "fail");
}

/// Zero attempts still makes one call.
#[test]
fn test_zero_attempts_counts_as_one() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 0);
    dependency.replay(&[false, true]);

    assert_eq!(
        accept(&ctx, &retry, "first"),
        Err(Failure::Exhausted { attempts: 1 })
    );
    assert_eq!(dependency.calls(), 1);
    assert_eq!(retry.traffic().failed, 1);
    assert_eq!(dependency.traffic().failed, 1);
}

#[test]
fn test_attempts_can_change_between_calls() {
    let ctx = SimContext::new();
    let (retry, dependency) = retry_over(&ctx, 1);
    dependency.replay(&[false, false, true]);

    assert!(accept(&ctx, &retry, "first").is_err());
    retry.configure(|config| config.attempts = 2);
    assert_eq!(retry.config().attempts, 2);
    assert!(accept(&ctx, &retry, "second").is_ok());
    assert_eq!(dependency.calls(), 3);
}
