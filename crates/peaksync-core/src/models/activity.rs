// ABOUTME: Activity model with basetype classification and derived statistics
// ABOUTME: Activity, ActivityBasetype, and ActivityStats definitions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ActivitySyncState;

/// Coarse activity family used to pick which peak families apply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityBasetype {
    /// Cycling of any kind (road, virtual, mountain, gravel, e-bike)
    Ride,
    /// Running, walking and hiking
    Run,
    /// Pool or open water swimming
    Swim,
    /// Anything else
    #[default]
    Other,
}

impl ActivityBasetype {
    /// Map a provider sport type string onto a basetype
    #[must_use]
    pub fn from_provider_string(sport_type: &str) -> Self {
        match sport_type {
            "Ride" | "VirtualRide" | "EBikeRide" | "EMountainBikeRide" | "MountainBikeRide"
            | "GravelRide" | "Velomobile" | "Handcycle" => Self::Ride,
            "Run" | "TrailRun" | "VirtualRun" | "Walk" | "Hike" => Self::Run,
            "Swim" => Self::Swim,
            _ => Self::Other,
        }
    }

    /// Stable lowercase name, used in index keys
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ride => "ride",
            Self::Run => "run",
            Self::Swim => "swim",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ActivityBasetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics derived from an activity's streams
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityStats {
    /// Seconds from first to last sample
    pub elapsed_time: f64,
    /// Seconds flagged active by the `active` stream
    pub active_time: f64,
    /// Total distance in metres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Mean heart rate in bpm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_heart_rate: Option<f64>,
    /// Max heart rate in bpm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<f64>,
    /// Mean power in watts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_power: Option<f64>,
    /// Whole-activity normalized power
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_power: Option<f64>,
    /// Normalized power over ftp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity_factor: Option<f64>,
    /// Training stress score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tss: Option<f64>,
}

/// A single recorded activity and its sync bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    /// Provider activity id
    pub id: i64,
    /// Owning athlete id
    pub athlete_id: i64,
    /// Activity start, epoch milliseconds
    pub start_time_ms: i64,
    /// Activity family
    pub basetype: ActivityBasetype,
    /// Display name
    pub name: String,
    /// Peaks from this activity are never stored
    #[serde(default)]
    pub peaks_exclude: bool,
    /// Athlete ftp at the time of the `athlete-settings` snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp: Option<f64>,
    /// Athlete weight at the time of the `athlete-settings` snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    /// Set by the `activity-stats` manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ActivityStats>,
    /// `processor -> manifest -> state`
    #[serde(default)]
    pub sync_state: ActivitySyncState,
}

impl Activity {
    /// New activity as discovered in the remote listing
    pub fn new(
        id: i64,
        athlete_id: i64,
        start_time_ms: i64,
        basetype: ActivityBasetype,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            athlete_id,
            start_time_ms,
            basetype,
            name: name.into(),
            peaks_exclude: false,
            ftp: None,
            weight_kg: None,
            stats: None,
            sync_state: ActivitySyncState::default(),
        }
    }
}
