// ABOUTME: Peak extraction and activity analysis engine for peaksync
// ABOUTME: Rolling windows with gap handling, powered averages, peak leaders, and summary stats
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! CPU-bound analysis of activity streams.
//!
//! Everything in this crate is synchronous and allocation-bounded by the
//! stream length, so the sync engine runs it on its worker pool.

pub use peaksync_core::models;

/// Whole-activity statistics and TSS
pub mod activity_stats;
/// Derived `velocity_smooth` and `active` streams
pub mod extra_streams;
/// Best-window search over candidate periods
pub mod peaks;
/// Normalized and effective power accumulators
pub mod powered;
/// Sliding window with gap padding
pub mod rolling_window;

pub use activity_stats::{compute_activity_stats, normalized_power, training_stress_score};
pub use extra_streams::{active_mask, derive_extra_streams, velocity_from_distance};
pub use peaks::{find_leaders, PeakConfig, PeakExtractor, PowerLeaders, WindowLeader};
pub use powered::{PoweredAccumulator, PoweredKind};
pub use rolling_window::{GapPolicy, RollingWindow, WindowAxis, WindowOptions};
