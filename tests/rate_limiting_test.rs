// ABOUTME: Integration tests for persistent windowed rate limiters
// ABOUTME: Runs on paused tokio time to check pacing, spreading, cancellation and resume from storage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use peaksync::clock::{Clock, MonotonicClock};
use peaksync::database_plugins::{KeyValueStore, MemoryStore};
use peaksync::errors::ErrorCode;
use peaksync::rate_limiting::{RateLimiter, RateLimiterGroup, RateLimiterSpec, RateLimiterState};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn store_and_clock() -> (Arc<dyn KeyValueStore>, Arc<dyn Clock>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::starting_at(0));
    (store, clock)
}

#[tokio::test(start_paused = true)]
async fn test_group_waits_for_slowest_window() {
    let (store, clock) = store_and_clock();
    let group = RateLimiterGroup::new(
        vec![
            RateLimiterSpec::new("burst", 1, 1_000),
            RateLimiterSpec::new("window", 2, 5_000),
        ],
        &store,
        &clock,
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let started = Instant::now();
    for _ in 0..3 {
        group.wait(&cancel).await.unwrap();
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(5_000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(6_000), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_spread_paces_calls_across_window() {
    let (store, clock) = store_and_clock();
    let limiter = RateLimiter::new(RateLimiterSpec::new("spread", 4, 4_000).spread(), store, clock);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    limiter.wait(&cancel).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1));
    for _ in 0..3 {
        limiter.wait(&cancel).await.unwrap();
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(3_000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(4_000), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_calls_within_limit_do_not_wait() {
    let (store, clock) = store_and_clock();
    let limiter = RateLimiter::new(RateLimiterSpec::new("roomy", 10, 60_000), store, clock);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    for _ in 0..10 {
        limiter.wait(&cancel).await.unwrap();
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(limiter.state().await.unwrap().count, 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_wait() {
    let (store, clock) = store_and_clock();
    let limiter = RateLimiter::new(RateLimiterSpec::new("c", 1, 60_000), store, clock);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = limiter.wait(&cancel).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationCancelled);
    assert_eq!(limiter.state().await.unwrap().count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_sleep_without_recording() {
    let (store, clock) = store_and_clock();
    let limiter = RateLimiter::new(
        RateLimiterSpec::new("q", 1, 60_000),
        Arc::clone(&store),
        clock,
    );
    let cancel = CancellationToken::new();
    limiter.wait(&cancel).await.unwrap();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = limiter.wait(&cancel).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationCancelled);
    assert!(started.elapsed() < Duration::from_secs(60));

    let stored: RateLimiterState =
        serde_json::from_value(store.get_value("rate-limiter/q").await.unwrap().unwrap()).unwrap();
    assert_eq!(stored.count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_state_resumes_from_store() {
    let (store, clock) = store_and_clock();
    let spec = RateLimiterSpec::new("daily", 1, 10_000);
    let cancel = CancellationToken::new();

    let first = RateLimiter::new(spec.clone(), Arc::clone(&store), Arc::clone(&clock));
    first.wait(&cancel).await.unwrap();
    drop(first);

    let restarted = RateLimiter::new(spec, store, clock);
    assert_eq!(restarted.state().await.unwrap().count, 1);
    let started = Instant::now();
    restarted.wait(&cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(10_000));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_state_counts_as_exhausted() {
    let (store, clock) = store_and_clock();
    let spec = RateLimiterSpec::new("garbled", 5, 2_000);
    store
        .set_value(&spec.state_key(), &json!("not a state"))
        .await
        .unwrap();

    let limiter = RateLimiter::new(spec, store, clock);
    let cancel = CancellationToken::new();
    let started = Instant::now();
    limiter.wait(&cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2_000));
    assert_eq!(limiter.state().await.unwrap().count, 1);
}

#[test]
fn test_invalid_specs_are_rejected() {
    assert!(RateLimiterSpec::new("", 1, 1_000).validate().is_err());
    assert!(RateLimiterSpec::new("zero", 0, 1_000).validate().is_err());
    assert!(RateLimiterSpec::new("flat", 1, 0).validate().is_err());
    assert!(RateLimiterSpec::new("ok", 1, 1).validate().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_default_group_has_two_limiters() {
    let (store, clock) = store_and_clock();
    let group = RateLimiterGroup::strava_default(&store, &clock).unwrap();
    let labels: Vec<&str> = group
        .limiters()
        .iter()
        .map(|limiter| limiter.spec().label.as_str())
        .collect();
    assert_eq!(labels, vec!["15min", "day"]);
    assert!(group.limiters()[0].spec().spread);
}
