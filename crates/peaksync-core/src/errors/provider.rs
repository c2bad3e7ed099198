// ABOUTME: Structured error types for remote provider fetches
// ABOUTME: Distinguishes quota (429) errors from transient and permanent API failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use thiserror::Error;

/// Errors raised while talking to a remote activity provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider rejected the request because a quota was exhausted (HTTP 429)
    #[error("{provider} rate limit exceeded ({limit_type}), retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Provider name
        provider: String,
        /// Seconds until the quota window reopens
        retry_after_secs: u64,
        /// Which quota tripped
        limit_type: String,
    },

    /// Non-success HTTP status other than 429
    #[error("{provider} API error {status_code}: {message}")]
    ApiError {
        /// Provider name
        provider: String,
        /// HTTP status code
        status_code: u16,
        /// Response body or reason
        message: String,
        /// Whether retrying the same request may succeed
        retryable: bool,
    },

    /// Transport failure (connect, timeout, reset)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Resource does not exist at the provider
    #[error("{provider} {resource_type} {resource_id} not found")]
    NotFound {
        /// Provider name
        provider: String,
        /// Kind of resource requested
        resource_type: String,
        /// Identifier requested
        resource_id: String,
    },

    /// Response could not be decoded
    #[error("{provider} returned malformed data: {message}")]
    ParseError {
        /// Provider name
        provider: String,
        /// What went wrong
        message: String,
    },

    /// Caller cancelled the request while it was waiting
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the fetch layer may retry this error with backoff.
    ///
    /// Quota errors are never retried here; the orchestrator pauses remote
    /// work instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { retryable, .. } => *retryable,
            Self::NetworkError(_) => true,
            Self::RateLimitExceeded { .. }
            | Self::NotFound { .. }
            | Self::ParseError { .. }
            | Self::Cancelled => false,
        }
    }

    /// Seconds to pause before touching the provider again, for quota errors
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
