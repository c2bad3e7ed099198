// ABOUTME: Core data models for activity sync and peak extraction
// ABOUTME: Re-exports Activity, Athlete, StreamRecord, PeakRecord and sync state types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Data Models
//!
//! Persisted records shared by the sync orchestrator, the peak extractor and
//! the store backends. Everything here is plain serde data; behaviour that
//! needs the manifest graph lives in the root crate.
//!
//! ## Core Models
//!
//! - `Activity`: one recorded workout plus its per-manifest sync state
//! - `Athlete`: the owner of activities and the source of ftp/weight
//! - `StreamRecord`: one time series of an activity
//! - `PeakRecord`: best sustained effort for one period
//! - `SyncManifest` / `SyncState`: sync bookkeeping

mod activity;
mod athlete;
mod peak;
mod stream;
mod sync;

pub use activity::{Activity, ActivityBasetype, ActivityStats};
pub use athlete::Athlete;
pub use peak::{PeakExtra, PeakRecord, PeakType};
pub use stream::{StreamRecord, StreamSet, StreamType};
pub use sync::{ActivitySyncState, SyncError, SyncManifest, SyncState};
