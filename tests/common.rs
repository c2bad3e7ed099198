// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides a scripted remote source, service wiring, and activity/stream builders
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]
//! Shared test utilities for `peaksync`
//!
//! This module provides common test setup functions to reduce duplication
//! across integration tests.

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use peaksync::clock::{Clock, MonotonicClock};
use peaksync::database_plugins::{KeyValueStore, MemoryStore, StoreBackend};
use peaksync::models::Athlete;
use peaksync::providers::{
    FetchPage, FetchRequest, ProviderError, ProviderResult, RemoteResource, RemoteSource,
    RetryPolicy,
};
use peaksync::rate_limiting::{RateLimiterGroup, RateLimiterSpec};
use peaksync::sync::{SyncOptions, SyncServices};
use peaksync::worker_pool::{WorkerPool, WorkerPoolConfig};
use serde_json::{json, Value};
use tracing::Level;

static INIT_LOGGER: Once = Once::new();

/// Epoch milliseconds the test clocks start at
pub const TEST_EPOCH_MS: i64 = 1_714_550_400_000;

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };

        let _ = tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .try_init();
    });
}

/// Remote source serving canned listing and stream rows
#[derive(Default)]
pub struct FakeSource {
    activities: Mutex<Vec<Value>>,
    streams: Mutex<HashMap<i64, Vec<Value>>>,
    stream_failures: Mutex<HashMap<i64, ProviderError>>,
    rate_limit_streams: AtomicBool,
    listing_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// List an activity and serve `streams` for it
    pub fn add_activity(&self, row: Value, streams: Vec<Value>) {
        let id = row["id"].as_i64().unwrap_or_default();
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row);
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, streams);
    }

    /// Fail every stream fetch of `activity_id` with `error`
    pub fn fail_streams(&self, activity_id: i64, error: ProviderError) {
        self.stream_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(activity_id, error);
    }

    /// Reject every stream fetch with a quota error
    pub fn rate_limit_streams(&self, enabled: bool) {
        self.rate_limit_streams.store(enabled, Ordering::SeqCst);
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn listing_page(&self, page: u32, per_page: u32) -> FetchPage {
        let rows = self
            .activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let per_page = per_page.max(1) as usize;
        let start = (page.max(1) as usize - 1) * per_page;
        let end = (start + per_page).min(rows.len());
        let slice = rows.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
        FetchPage {
            rows: slice,
            has_more: end < rows.len(),
        }
    }

    fn stream_page(&self, activity_id: i64) -> ProviderResult<FetchPage> {
        if self.rate_limit_streams.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimitExceeded {
                provider: "fake".to_owned(),
                retry_after_secs: 60,
                limit_type: "15min".to_owned(),
            });
        }
        if let Some(error) = self
            .stream_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&activity_id)
        {
            return Err(error.clone());
        }
        let rows = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&activity_id)
            .cloned()
            .unwrap_or_default();
        Ok(FetchPage {
            rows,
            has_more: false,
        })
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchPage> {
        match &request.resource {
            RemoteResource::Activities { .. } => {
                self.listing_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.listing_page(request.page, request.per_page))
            }
            RemoteResource::Streams { activity_id, .. } => {
                self.stream_calls.fetch_add(1, Ordering::SeqCst);
                self.stream_page(*activity_id)
            }
        }
    }
}

/// Services over one shared in-memory store
pub struct TestServices {
    pub store: MemoryStore,
    pub kv: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub pool: Arc<WorkerPool>,
    pub services: SyncServices,
}

/// Wire `source` to a fresh memory store, a generous limiter and a small pool.
///
/// Must be called inside a tokio runtime.
pub fn test_services(source: Arc<FakeSource>) -> TestServices {
    init_test_logging();
    let store = MemoryStore::new();
    let backend: Arc<dyn StoreBackend> = Arc::new(store.clone());
    let kv: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::starting_at(TEST_EPOCH_MS));
    let limiters = Arc::new(
        RateLimiterGroup::new(
            vec![RateLimiterSpec::new("test", 100_000, 1_000)],
            &kv,
            &clock,
        )
        .expect("valid limiter"),
    );
    let pool = Arc::new(WorkerPool::new(test_pool_config(2)));
    let services = SyncServices {
        backend,
        kv: Arc::clone(&kv),
        source,
        limiters,
        pool: Arc::clone(&pool),
        clock: Arc::clone(&clock),
    };
    TestServices {
        store,
        kv,
        clock,
        pool,
        services,
    }
}

/// Pool configuration with short timers
pub fn test_pool_config(max_workers: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_workers,
        idle_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    }
}

/// Options that never sleep between retries
pub fn test_options() -> SyncOptions {
    SyncOptions {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay_ms: 1,
        },
        local_concurrency: 2,
        job_timeout: Duration::from_secs(10),
        ..SyncOptions::default()
    }
}

pub fn athlete(id: i64) -> Athlete {
    Athlete {
        id,
        name: format!("Athlete {id}"),
        ftp: Some(250.0),
        weight_kg: Some(70.0),
        sync_enabled: true,
    }
}

/// Listing row as the remote returns it
pub fn activity_row(id: i64, athlete_id: i64, start_date: &str, sport_type: &str) -> Value {
    json!({
        "id": id,
        "name": format!("{sport_type} {id}"),
        "sport_type": sport_type,
        "start_date": start_date,
        "athlete": {"id": athlete_id},
    })
}

/// `time` and `watts` rows for a steady effort sampled at 1 Hz
pub fn steady_power_streams(samples: usize, watts: f64) -> Vec<Value> {
    let time: Vec<f64> = (0..samples).map(|i| i as f64).collect();
    let power = vec![watts; samples];
    vec![
        json!({"type": "time", "data": time}),
        json!({"type": "watts", "data": power}),
    ]
}

/// Seconds `0..samples` as floats
pub fn seconds(samples: usize) -> Vec<f64> {
    (0..samples).map(|i| i as f64).collect()
}
