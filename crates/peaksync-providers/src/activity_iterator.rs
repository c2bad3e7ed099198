// ABOUTME: Streaming activity listing for memory-efficient paginated fetching
// ABOUTME: Implements futures::Stream over gated, retried page fetches of activity summaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Streaming Activity Listing
//!
//! Pages are fetched lazily: the next page is requested only once the
//! buffered rows of the previous one have been consumed. Every page fetch
//! waits on the request gate first, so a long listing is paced by the rate
//! limiter instead of tripping the remote quota.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use peaksync_providers::{create_activity_stream, RetryPolicy, StreamConfig, Ungated};
//!
//! async fn list(source: &dyn peaksync_providers::RemoteSource) {
//!     let policy = RetryPolicy::default();
//!     let mut stream =
//!         create_activity_stream(source, &Ungated, 42, StreamConfig::default(), &policy);
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(activity) => println!("activity {}", activity.id),
//!             Err(e) => eprintln!("listing failed: {e}"),
//!         }
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;

use peaksync_core::errors::{AppError, AppResult};
use peaksync_core::models::{Activity, ActivityBasetype};

use crate::retry::RetryPolicy;
use crate::source::{fetch_page, FetchRequest, RemoteSource, RequestGate};

/// Default page size for activity listing
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Minimum page size to prevent excessive API calls
pub const MIN_PAGE_SIZE: usize = 10;

/// Maximum page size accepted by the remote
pub const MAX_PAGE_SIZE: usize = 200;

/// Configuration for listing behavior
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Number of activities to fetch per page
    pub page_size: usize,
    /// Maximum total activities to fetch (None for unlimited)
    pub max_activities: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_activities: None,
        }
    }
}

impl StreamConfig {
    /// Create configuration with specified page size
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            max_activities: None,
        }
    }

    /// Set maximum number of activities to fetch
    #[must_use]
    pub const fn with_max_activities(mut self, max: usize) -> Self {
        self.max_activities = Some(max);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AthleteRef {
    id: i64,
}

/// Activity summary row as listed by the remote
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteActivity {
    /// Provider activity id
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Detailed sport type, e.g. `VirtualRide`
    #[serde(default)]
    pub sport_type: Option<String>,
    /// Legacy activity type, used when `sport_type` is absent
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    /// Start time
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    athlete: Option<AthleteRef>,
}

impl RemoteActivity {
    /// Decode one listing row
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the row lacks required fields.
    pub fn from_row(row: Value) -> AppResult<Self> {
        serde_json::from_value(row)
            .map_err(|e| AppError::serialization(format!("invalid activity row: {e}")))
    }

    /// Owning athlete id as reported by the remote, if present
    #[must_use]
    pub fn athlete_id(&self) -> Option<i64> {
        self.athlete.as_ref().map(|athlete| athlete.id)
    }

    /// Classified activity family
    #[must_use]
    pub fn basetype(&self) -> ActivityBasetype {
        self.sport_type
            .as_deref()
            .or(self.activity_type.as_deref())
            .map_or(ActivityBasetype::Other, ActivityBasetype::from_provider_string)
    }

    /// Fresh local activity for `athlete_id`
    #[must_use]
    pub fn into_activity(self, athlete_id: i64) -> Activity {
        let basetype = self.basetype();
        Activity::new(
            self.id,
            athlete_id,
            self.start_date.timestamp_millis(),
            basetype,
            self.name,
        )
    }
}

/// Type alias for the listing stream
pub type ActivityStream<'a> = Pin<Box<dyn Stream<Item = AppResult<RemoteActivity>> + Send + 'a>>;

/// Lazily page through an athlete's activity listing
///
/// # Arguments
///
/// * `source` - Remote to list from
/// * `gate` - Awaited before every page request
/// * `athlete_id` - Whose activities to list
/// * `config` - Page size and limits
/// * `policy` - Retry policy for transient failures
pub fn create_activity_stream<'a>(
    source: &'a dyn RemoteSource,
    gate: &'a dyn RequestGate,
    athlete_id: i64,
    config: StreamConfig,
    policy: &'a RetryPolicy,
) -> ActivityStream<'a> {
    let page_size = config.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    let max_activities = config.max_activities;

    Box::pin(try_stream! {
        let mut buffer: VecDeque<Value> = VecDeque::new();
        let mut request = FetchRequest::activities(
            athlete_id,
            u32::try_from(page_size).unwrap_or(u32::MAX),
        );
        let mut yielded_count: usize = 0;
        let mut exhausted = false;

        loop {
            if let Some(max) = max_activities {
                if yielded_count >= max {
                    break;
                }
            }

            if let Some(row) = buffer.pop_front() {
                let activity = RemoteActivity::from_row(row)?;
                yielded_count += 1;
                yield activity;
                continue;
            }

            if exhausted {
                break;
            }

            let page = fetch_page(source, gate, &request, policy).await?;
            exhausted = !page.has_more || page.rows.is_empty();
            buffer.extend(page.rows);
            request = request.next_page();
        }
    })
}
