//! Aside cache refreshing in the background.

use std::rc::Rc;

use moonpool_resilience::{stages::AsideCache, Event, Failure, SimContext, Stage};

use crate::support::ReplayDependency;

#[test]
fn test_fails_when_nothing_cached() {
    let ctx = SimContext::new();
    let dependency = Rc::new(ReplayDependency::new(&ctx));
    dependency.replay_with(&[true], "custom-success", "custom-fail");
    let cache = Rc::new(AsideCache::new(&ctx, dependency.clone()));

    let outcome = crate::support::accept(&ctx, &cache, "first");

    assert_eq!(outcome, Err(Failure::CacheMiss));
    assert_eq!(outcome.expect_err("miss").message(), "fail");
}

/// The first read misses but triggers a refresh; a later read hits.
#[test]
fn test_serves_refreshed_payload() {
    let ctx = SimContext::new();
    let dependency = Rc::new(ReplayDependency::new(&ctx));
    dependency.replay_with(&[true, true], "custom-success", "custom-fail");
    let cache = Rc::new(AsideCache::new(&ctx, dependency.clone()));
    let stage = cache.clone();
    let clock = ctx.clock().clone();
    let first = Event::new(&ctx, "first");
    let again = Event::new(&ctx, "first");

    let (miss, hit, refreshing) = ctx
        .clock()
        .block_on(async move {
            let miss = stage.accept(&first).await;
            clock.wait(2).await?;
            let hit = stage.accept(&again).await;
            Ok::<_, Failure>((miss, hit, stage.refreshing()))
        })
        .expect("clock drives both reads")
        .expect("clock stays alive");

    assert_eq!(miss.expect_err("first read misses").message(), "fail");
    assert_eq!(hit, Ok(Some("custom-success".to_string())));
    assert_eq!(refreshing, 1, "the second refresh is still running");
    assert_eq!(dependency.calls(), 2);
    assert_eq!(cache.keys(), vec!["first"]);
}

/// Failed refreshes leave the cache untouched.
#[test]
fn test_failed_refresh_is_not_cached() {
    let ctx = SimContext::new();
    let dependency = Rc::new(ReplayDependency::new(&ctx));
    dependency.replay(&[false]);
    let cache = Rc::new(AsideCache::new(&ctx, dependency.clone()));

    assert!(crate::support::accept(&ctx, &cache, "first").is_err());
    crate::support::advance(&ctx, 5);

    assert!(cache.get("first").is_none());
    assert_eq!(cache.refreshing(), 0);
    assert_eq!(dependency.traffic().failed, 1);
}
