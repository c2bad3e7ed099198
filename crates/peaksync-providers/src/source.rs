// ABOUTME: Remote source abstraction returning paginated JSON rows
// ABOUTME: FetchRequest/FetchPage types, the RequestGate seam, and gated fetch with retry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use peaksync_core::errors::provider::ProviderResult;
use peaksync_core::errors::{AppError, AppResult};
use peaksync_core::models::StreamType;

use crate::retry::{with_retry, RetryPolicy};

/// What is being fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResource {
    /// Activity summaries of one athlete, newest first
    Activities {
        /// Athlete id
        athlete_id: i64,
    },
    /// Raw streams of one activity
    Streams {
        /// Activity id
        activity_id: i64,
        /// Stream types to include
        types: Vec<StreamType>,
    },
}

/// One page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Resource to fetch
    pub resource: RemoteResource,
    /// 1-based page number
    pub page: u32,
    /// Rows per page
    pub per_page: u32,
}

impl FetchRequest {
    /// First page of an athlete's activity listing
    #[must_use]
    pub const fn activities(athlete_id: i64, per_page: u32) -> Self {
        Self {
            resource: RemoteResource::Activities { athlete_id },
            page: 1,
            per_page,
        }
    }

    /// All streams of one activity (single page)
    #[must_use]
    pub fn streams(activity_id: i64, types: &[StreamType]) -> Self {
        Self {
            resource: RemoteResource::Streams {
                activity_id,
                types: types.to_vec(),
            },
            page: 1,
            per_page: 0,
        }
    }

    /// Same request for the following page
    #[must_use]
    pub fn next_page(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            page: self.page + 1,
            per_page: self.per_page,
        }
    }
}

/// One page of JSON rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    /// Rows as returned by the provider
    pub rows: Vec<Value>,
    /// Whether another page may follow
    pub has_more: bool,
}

/// A rate-limited remote holding athletes' activities
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Provider name for logs and errors
    fn name(&self) -> &str;

    /// Fetch one page
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::RateLimitExceeded` for quota rejections, and
    /// transport, status or decoding errors otherwise.
    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchPage>;
}

/// Admission control awaited before every remote call
#[async_trait]
pub trait RequestGate: Send + Sync {
    /// Block until one more request may be sent
    ///
    /// # Errors
    ///
    /// Returns an error when the wait is cancelled or gate state cannot be
    /// persisted.
    async fn acquire(&self) -> AppResult<()>;
}

/// Gate that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct Ungated;

#[async_trait]
impl RequestGate for Ungated {
    async fn acquire(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Fetch one page, passing the gate before every attempt and retrying
/// transient failures
///
/// # Errors
///
/// Returns the gate error, the first non-retryable provider error, or the
/// last transient error once retries are exhausted.
pub async fn fetch_page(
    source: &dyn RemoteSource,
    gate: &dyn RequestGate,
    request: &FetchRequest,
    policy: &RetryPolicy,
) -> AppResult<FetchPage> {
    with_retry(policy, source.name(), move || async move {
        gate.acquire().await?;
        let page = source.fetch(request).await?;
        debug!(
            provider = source.name(),
            page = request.page,
            rows = page.rows.len(),
            "fetched remote page"
        );
        Ok::<_, AppError>(page)
    })
    .await
}
