// ABOUTME: Wall-clock abstraction used for sync timestamps and rate limiter windows
// ABOUTME: Provides a system clock and a tokio-instant clock that follows paused test time
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::Debug;

use chrono::Utc;
use tokio::time::Instant;

/// Source of epoch milliseconds
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock anchored to a wall-clock instant and advanced by `tokio::time::Instant`.
///
/// Under a paused tokio runtime this clock moves only when tokio time is
/// advanced, which keeps limiter windows and backoff deterministic in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
    anchor_ms: i64,
}

impl MonotonicClock {
    /// Anchor at the current wall-clock time
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }

    /// Anchor at an explicit epoch millisecond value
    #[must_use]
    pub fn starting_at(anchor_ms: i64) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_ms,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }
}
