// ABOUTME: Sync manifest descriptors and per-activity sync state records
// ABOUTME: SyncManifest, SyncState, SyncError, and the ActivitySyncState map
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Static description of one unit of sync work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncManifest {
    /// Owning processor
    pub processor: String,
    /// Unique name within the processor
    pub name: String,
    /// Bumping the version forces every activity to re-run the manifest
    pub version: u32,
    /// Manifests of the same processor that must succeed first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Backoff base; the n-th consecutive failure waits `base * 2^n`
    pub error_backoff_base_ms: i64,
}

impl SyncManifest {
    /// Manifest with no dependencies
    pub fn new(
        processor: impl Into<String>,
        name: impl Into<String>,
        version: u32,
        error_backoff_base_ms: i64,
    ) -> Self {
        Self {
            processor: processor.into(),
            name: name.into(),
            version,
            depends_on: Vec::new(),
            error_backoff_base_ms,
        }
    }

    /// Add dependencies
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Failure bookkeeping for one manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncError {
    /// Consecutive failures; survives `clear` and resets on success
    pub count: u32,
    /// When the last failure happened (epoch ms); unset after `clear`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State of one manifest on one activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    /// Version of the manifest last completed or attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Failure bookkeeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncError>,
}

impl SyncState {
    /// Completed at `version` with no active error
    #[must_use]
    pub fn has_success(&self, version: u32) -> bool {
        self.version == Some(version) && !self.has_error()
    }

    /// An error is active (stamped and not cleared)
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|error| error.timestamp.is_some())
    }

    /// Record completion; drops the error entirely
    pub fn mark_success(&mut self, version: u32) {
        self.version = Some(version);
        self.error = None;
    }

    /// Record a failed attempt at `version`
    pub fn mark_error(&mut self, version: u32, now_ms: i64, message: impl Into<String>) {
        self.version = Some(version);
        let error = self.error.get_or_insert_with(SyncError::default);
        error.count = error.count.saturating_add(1);
        error.timestamp = Some(now_ms);
        error.message = Some(message.into());
    }

    /// Forget completion and the active error, keeping the failure count
    pub fn clear(&mut self) {
        self.version = None;
        if let Some(error) = self.error.as_mut() {
            error.timestamp = None;
            error.message = None;
        }
    }

    /// Earliest time the manifest may be retried, when an error is active
    #[must_use]
    pub fn retry_at(&self, backoff_base_ms: i64) -> Option<i64> {
        let error = self.error.as_ref()?;
        let timestamp = error.timestamp?;
        let factor = 2_i64.checked_pow(error.count).unwrap_or(i64::MAX);
        Some(timestamp.saturating_add(backoff_base_ms.saturating_mul(factor)))
    }
}

/// `processor -> manifest name -> state` for one activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ActivitySyncState(BTreeMap<String, BTreeMap<String, SyncState>>);

impl ActivitySyncState {
    /// State of one manifest, if ever touched
    #[must_use]
    pub fn get(&self, processor: &str, name: &str) -> Option<&SyncState> {
        self.0.get(processor)?.get(name)
    }

    /// Mutable state of one manifest, created on demand
    pub fn get_mut(&mut self, processor: &str, name: &str) -> &mut SyncState {
        self.0
            .entry(processor.to_owned())
            .or_default()
            .entry(name.to_owned())
            .or_default()
    }

    /// Mutable state of one manifest, only if it was recorded before
    pub fn existing_mut(&mut self, processor: &str, name: &str) -> Option<&mut SyncState> {
        self.0.get_mut(processor)?.get_mut(name)
    }

    /// Iterate `(processor, name, state)`
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &SyncState)> {
        self.0.iter().flat_map(|(processor, states)| {
            states
                .iter()
                .map(move |(name, state)| (processor.as_str(), name.as_str(), state))
        })
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}
