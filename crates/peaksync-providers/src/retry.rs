// ABOUTME: Retry helper applying capped linear backoff to transient remote errors
// ABOUTME: Quota and permanent errors are returned on the first occurrence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use peaksync_core::errors::provider::ProviderError;
use peaksync_core::errors::{AppError, ErrorCode};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay unit; the n-th retry waits `n * base`
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay unit in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    /// Whether retrying the same operation may succeed
    fn is_retryable(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

impl Retryable for AppError {
    fn is_retryable(&self) -> bool {
        self.code == ErrorCode::ExternalServiceUnavailable
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
///
/// # Errors
///
/// Returns the first non-retryable error, or the last retryable one once
/// `policy.max_retries` retries have been spent.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
