// ABOUTME: Remote activity sources for peaksync with retry and paginated listing
// ABOUTME: RemoteSource trait, reqwest HTTP source, request gating, and stream decoding
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Remote activity sources and the plumbing around them.
//!
//! A [`RemoteSource`] answers one paginated request at a time. Callers go
//! through [`fetch_page`], which waits on a [`RequestGate`] (the rate limiter)
//! before every attempt and retries transient failures with linear backoff.
//! Quota errors are never retried here.

pub use peaksync_core::errors;
pub use peaksync_core::models;

/// Streaming activity listing over paginated fetches
pub mod activity_iterator;
/// Shared HTTP client with timeouts
pub mod http_client;
/// reqwest-backed `RemoteSource`
pub mod http_source;
/// Linear-backoff retry for transient errors
pub mod retry;
/// Source trait, request and page types
pub mod source;
/// Decoding of provider stream payloads
pub mod streams;

pub use activity_iterator::{
    create_activity_stream, ActivityStream, RemoteActivity, StreamConfig, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
pub use http_client::{initialize_shared_client, shared_client};
pub use http_source::HttpSource;
pub use peaksync_core::errors::provider::{ProviderError, ProviderResult};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use source::{fetch_page, FetchPage, FetchRequest, RemoteResource, RemoteSource, RequestGate, Ungated};
pub use streams::{decode_streams, fetch_streams};
