// ABOUTME: reqwest-backed RemoteSource for a Strava-style REST API
// ABOUTME: Maps HTTP status codes onto ProviderError, honouring Retry-After on 429
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};

use peaksync_core::errors::provider::{ProviderError, ProviderResult};
use peaksync_core::models::StreamType;

use crate::http_client::shared_client;
use crate::source::{FetchPage, FetchRequest, RemoteResource, RemoteSource};

/// Assumed quota window when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 15 * 60;

/// HTTP implementation of [`RemoteSource`]
#[derive(Debug, Clone)]
pub struct HttpSource {
    name: String,
    base_url: String,
    access_token: String,
    client: Client,
}

impl HttpSource {
    /// Source using the shared client
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self::with_client(name, base_url, access_token, shared_client().clone())
    }

    /// Source using an explicit client
    #[must_use]
    pub fn with_client(
        name: impl Into<String>,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            access_token: access_token.into(),
            client,
        }
    }

    fn url(&self, request: &FetchRequest) -> (String, Vec<(&'static str, String)>) {
        match &request.resource {
            RemoteResource::Activities { athlete_id } => (
                format!("{}/athletes/{athlete_id}/activities", self.base_url),
                vec![
                    ("page", request.page.to_string()),
                    ("per_page", request.per_page.to_string()),
                ],
            ),
            RemoteResource::Streams { activity_id, types } => {
                let keys: Vec<&str> = types.iter().map(StreamType::as_str).collect();
                (
                    format!("{}/activities/{activity_id}/streams", self.base_url),
                    vec![("keys", keys.join(",")), ("key_by_type", "false".to_owned())],
                )
            }
        }
    }

    fn retry_after(headers: &HeaderMap) -> u64 {
        headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
    }

    /// Quota and missing-resource answers the caller handles as control flow
    fn is_expected_rejection(status: StatusCode) -> bool {
        matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::NOT_FOUND)
    }

    fn status_error(
        &self,
        request: &FetchRequest,
        status: StatusCode,
        headers: &HeaderMap,
        body: String,
    ) -> ProviderError {
        let status_code = status.as_u16();
        if Self::is_expected_rejection(status) {
            warn!(
                provider = %self.name,
                status = status_code,
                "remote request rejected"
            );
        } else {
            error!(
                provider = %self.name,
                status = status_code,
                body_length = body.len(),
                "remote request failed"
            );
        }
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded {
                provider: self.name.clone(),
                retry_after_secs: Self::retry_after(headers),
                limit_type: "API rate limit".to_owned(),
            },
            StatusCode::NOT_FOUND => {
                let (resource_type, resource_id) = match &request.resource {
                    RemoteResource::Activities { athlete_id } => ("athlete", athlete_id),
                    RemoteResource::Streams { activity_id, .. } => ("activity", activity_id),
                };
                ProviderError::NotFound {
                    provider: self.name.clone(),
                    resource_type: resource_type.to_owned(),
                    resource_id: resource_id.to_string(),
                }
            }
            _ => ProviderError::ApiError {
                provider: self.name.clone(),
                status_code,
                message: body,
                retryable: status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT,
            },
        }
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchPage> {
        let (url, query) = self.url(request);
        debug!(provider = %self.name, url = %url, page = request.page, "remote request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(request, status, &headers, body));
        }

        let body: Value = response.json().await.map_err(|e| ProviderError::ParseError {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;
        let Value::Array(rows) = body else {
            return Err(ProviderError::ParseError {
                provider: self.name.clone(),
                message: "expected a JSON array".to_owned(),
            });
        };

        let has_more = match request.resource {
            RemoteResource::Activities { .. } => {
                request.per_page > 0 && rows.len() >= request.per_page as usize
            }
            RemoteResource::Streams { .. } => false,
        };
        Ok(FetchPage { rows, has_more })
    }
}
