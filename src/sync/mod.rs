// ABOUTME: Activity sync engine: manifest graph, manifest handlers and the orchestrator
// ABOUTME: Schedules per-activity work with dependencies, backoff and remote quota pauses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Activity synchronization
//!
//! - [`manifest`]: validated processor/manifest graph and scheduling rules
//! - [`handlers`]: the work performed by each manifest
//! - [`orchestrator`]: per-athlete passes over the graph

/// Manifest graph and per-activity scheduling
pub mod manifest;

/// Manifest handlers
pub mod handlers;

/// Per-athlete sync driver
pub mod orchestrator;

pub use handlers::{
    default_handlers, ActivityStatsHandler, ActivityUpdate, AthleteSettingsHandler,
    ExtraStreamsHandler, FetchStreamsHandler, ManifestHandler, PeaksHandler, SyncContext,
    TaskInput,
};
pub use manifest::{NextManifest, SyncManifestGraph};
pub use orchestrator::{
    RemovalSummary, SyncOptions, SyncOrchestrator, SyncServices, SyncSummary,
};
