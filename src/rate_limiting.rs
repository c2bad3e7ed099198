// ABOUTME: Persistent windowed rate limiters gating every remote request
// ABOUTME: Limiter state survives restarts through the key-value store; waits are cancellable
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Remote Request Rate Limiting
//!
//! A [`RateLimiter`] counts calls inside a fixed window of `period_ms`. Once
//! `limit` calls have been made the caller sleeps until the window expires.
//! In spread mode the calls of one window are additionally paced so the
//! k-th call is released no earlier than `window_start + k * period / limit`.
//!
//! A [`RateLimiterGroup`] combines several limiters (for example a short
//! burst window and a daily quota) and waits on each in turn.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use peaksync_core::constants::rate_limits::{
    DAILY_LIMIT, DAILY_PERIOD_MS, FIFTEEN_MINUTE_LIMIT, FIFTEEN_MINUTE_PERIOD_MS, STATE_KEY_PREFIX,
};
use peaksync_core::errors::{AppError, AppResult};
use peaksync_providers::RequestGate;

use crate::clock::Clock;
use crate::database_plugins::KeyValueStore;

/// Static configuration of one limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterSpec {
    /// Label, also the persistence key suffix
    pub label: String,
    /// Calls allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub period_ms: i64,
    /// Pace calls evenly across the window
    #[serde(default)]
    pub spread: bool,
}

impl RateLimiterSpec {
    /// Limiter spec
    pub fn new(label: impl Into<String>, limit: u32, period_ms: i64) -> Self {
        Self {
            label: label.into(),
            limit,
            period_ms,
            spread: false,
        }
    }

    /// Enable spread pacing
    #[must_use]
    pub const fn spread(mut self) -> Self {
        self.spread = true;
        self
    }

    /// Reject specs that could never release a call
    ///
    /// # Errors
    ///
    /// Returns a config error for an empty label, zero limit or non-positive period
    pub fn validate(&self) -> AppResult<()> {
        if self.label.is_empty() {
            return Err(AppError::config("rate limiter label must not be empty"));
        }
        if self.limit == 0 {
            return Err(AppError::config(format!(
                "rate limiter {} must allow at least one call",
                self.label
            )));
        }
        if self.period_ms <= 0 {
            return Err(AppError::config(format!(
                "rate limiter {} period must be positive",
                self.label
            )));
        }
        Ok(())
    }

    /// Key-value key holding this limiter's state
    #[must_use]
    pub fn state_key(&self) -> String {
        format!("{STATE_KEY_PREFIX}{}", self.label)
    }

    /// The Strava-style defaults: a spread 15 minute window and a daily quota
    #[must_use]
    pub fn strava_defaults() -> Vec<Self> {
        vec![
            Self::new("15min", FIFTEEN_MINUTE_LIMIT, FIFTEEN_MINUTE_PERIOD_MS).spread(),
            Self::new("day", DAILY_LIMIT, DAILY_PERIOD_MS),
        ]
    }
}

/// Persisted limiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterState {
    /// Calls made in the current window
    pub count: u32,
    /// Window start in epoch milliseconds
    pub window_start_ms: i64,
}

/// One windowed limiter
pub struct RateLimiter {
    spec: RateLimiterSpec,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<RateLimiterState>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("spec", &self.spec)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter persisting into `store`; state is loaded lazily on first use
    #[must_use]
    pub fn new(
        spec: RateLimiterSpec,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            spec,
            store,
            clock,
            state: Mutex::new(None),
        }
    }

    /// Limiter configuration
    #[must_use]
    pub const fn spec(&self) -> &RateLimiterSpec {
        &self.spec
    }

    /// Current state, loading it if needed
    ///
    /// # Errors
    ///
    /// Returns store read errors
    pub async fn state(&self) -> AppResult<RateLimiterState> {
        let mut guard = self.state.lock().await;
        self.loaded(&mut guard).await
    }

    async fn loaded(&self, slot: &mut Option<RateLimiterState>) -> AppResult<RateLimiterState> {
        if let Some(state) = *slot {
            return Ok(state);
        }
        let now = self.clock.now_ms();
        let state = match self.store.get_value(&self.spec.state_key()).await? {
            None => RateLimiterState {
                count: 0,
                window_start_ms: now,
            },
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(
                    limiter = %self.spec.label,
                    error = %e,
                    "undecodable limiter state, treating window as exhausted"
                );
                RateLimiterState {
                    count: self.spec.limit,
                    window_start_ms: now,
                }
            }),
        };
        *slot = Some(state);
        Ok(state)
    }

    /// Milliseconds to wait before the next call may be released, or `None`
    /// when it may go now
    fn delay_ms(&self, state: RateLimiterState, now: i64) -> Option<i64> {
        let window_end = state.window_start_ms.saturating_add(self.spec.period_ms);
        if state.count >= self.spec.limit {
            return Some((window_end - now).max(1));
        }
        if self.spec.spread {
            let offset = self.spec.period_ms * i64::from(state.count) / i64::from(self.spec.limit);
            let release_at = state.window_start_ms.saturating_add(offset);
            if release_at > now {
                return Some(release_at - now);
            }
        }
        None
    }

    /// Try to take one call. Returns the delay to sleep when the window is
    /// full or the call is not yet paced in.
    async fn try_acquire(&self) -> AppResult<Option<i64>> {
        let mut guard = self.state.lock().await;
        let mut state = self.loaded(&mut guard).await?;
        let now = self.clock.now_ms();

        if now - state.window_start_ms >= self.spec.period_ms {
            state = RateLimiterState {
                count: 0,
                window_start_ms: now,
            };
        }

        if let Some(delay) = self.delay_ms(state, now) {
            *guard = Some(state);
            return Ok(Some(delay));
        }

        state.count += 1;
        self.store
            .set_value(&self.spec.state_key(), &serde_json::to_value(state)?)
            .await?;
        *guard = Some(state);
        Ok(None)
    }

    /// Wait until a call may be made, then record it.
    ///
    /// No lock is held while sleeping; a cancelled wait records nothing.
    ///
    /// # Errors
    ///
    /// Returns `OperationCancelled` when `cancel` fires, or store errors
    pub async fn wait(&self, cancel: &CancellationToken) -> AppResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::cancelled(format!(
                    "rate limiter {} wait cancelled",
                    self.spec.label
                )));
            }
            let Some(delay_ms) = self.try_acquire().await? else {
                return Ok(());
            };
            debug!(limiter = %self.spec.label, delay_ms, "rate limited, waiting");
            let delay = Duration::from_millis(u64::try_from(delay_ms).unwrap_or(1));
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::cancelled(format!(
                        "rate limiter {} wait cancelled",
                        self.spec.label
                    )));
                }
                () = sleep(delay) => {}
            }
        }
    }
}

/// Limiters that must all admit a call
#[derive(Debug, Default)]
pub struct RateLimiterGroup {
    limiters: Vec<RateLimiter>,
}

impl RateLimiterGroup {
    /// Group from specs sharing one store and clock
    ///
    /// # Errors
    ///
    /// Returns a config error if any spec is invalid
    pub fn new(
        specs: Vec<RateLimiterSpec>,
        store: &Arc<dyn KeyValueStore>,
        clock: &Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let limiters = specs
            .into_iter()
            .map(|spec| {
                spec.validate()?;
                Ok(RateLimiter::new(spec, Arc::clone(store), Arc::clone(clock)))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { limiters })
    }

    /// Default Strava-like group: 100 per 15 minutes (spread), 1000 per day
    ///
    /// # Errors
    ///
    /// Never fails for the built-in specs; returns config errors otherwise
    pub fn strava_default(
        store: &Arc<dyn KeyValueStore>,
        clock: &Arc<dyn Clock>,
    ) -> AppResult<Self> {
        Self::new(RateLimiterSpec::strava_defaults(), store, clock)
    }

    /// Member limiters
    #[must_use]
    pub fn limiters(&self) -> &[RateLimiter] {
        &self.limiters
    }

    /// Wait on every member in turn
    ///
    /// # Errors
    ///
    /// Returns the first member's cancellation or store error
    pub async fn wait(&self, cancel: &CancellationToken) -> AppResult<()> {
        for limiter in &self.limiters {
            limiter.wait(cancel).await?;
        }
        Ok(())
    }

    /// Gate for remote fetches bound to `cancel`
    #[must_use]
    pub const fn gate<'a>(&'a self, cancel: &'a CancellationToken) -> LimiterGate<'a> {
        LimiterGate {
            group: self,
            cancel,
        }
    }
}

/// [`RequestGate`] that waits on a limiter group
#[derive(Debug, Clone, Copy)]
pub struct LimiterGate<'a> {
    group: &'a RateLimiterGroup,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl RequestGate for LimiterGate<'_> {
    async fn acquire(&self) -> AppResult<()> {
        self.group.wait(self.cancel).await
    }
}
