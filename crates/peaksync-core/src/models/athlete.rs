// ABOUTME: Athlete profile model
// ABOUTME: Holds the physiological settings snapshotted onto activities
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::{Deserialize, Serialize};

/// An athlete whose activities are synchronized
///
/// # Examples
///
/// ```rust
/// use peaksync_core::models::Athlete;
///
/// let athlete = Athlete {
///     id: 42,
///     name: "Eddy".into(),
///     ftp: Some(280.0),
///     weight_kg: Some(72.0),
///     sync_enabled: true,
/// };
/// assert!(athlete.sync_enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Athlete {
    /// Provider athlete id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Functional threshold power in watts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp: Option<f64>,
    /// Body weight in kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    /// Whether the periodic sync loop should process this athlete
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,
}

const fn default_sync_enabled() -> bool {
    true
}
