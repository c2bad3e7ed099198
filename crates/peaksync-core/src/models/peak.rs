// ABOUTME: Peak effort records produced by rolling-window extraction
// ABOUTME: PeakType, PeakRecord, and the PeakExtra window metadata
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ActivityBasetype;

/// Which metric a peak measures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PeakType {
    /// Mean power (watts), period in seconds
    Power,
    /// Normalized power (watts), period in seconds
    NormalizedPower,
    /// Effective power, xPower (watts), period in seconds
    EffectivePower,
    /// Mean heart rate (bpm), period in seconds
    HeartRate,
    /// Speed (m/s), period in metres
    Pace,
}

impl PeakType {
    /// Stable short name, used in index keys
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::NormalizedPower => "np",
            Self::EffectivePower => "xp",
            Self::HeartRate => "hr",
            Self::Pace => "pace",
        }
    }
}

impl fmt::Display for PeakType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window metadata stored alongside a peak
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeakExtra {
    /// Seconds from activity start to the window's first sample
    pub start: f64,
    /// Seconds from activity start to the window's last sample
    pub end: f64,
    /// Samples in the window, synthetic gap samples included
    pub samples: usize,
    /// Normalized power over the same window (power peaks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub np: Option<f64>,
    /// Effective power over the same window (power peaks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<f64>,
}

/// Best sustained effort of one activity for one period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeakRecord {
    /// Source activity
    pub activity_id: i64,
    /// Owning athlete
    pub athlete_id: i64,
    /// Family of the source activity
    pub basetype: ActivityBasetype,
    /// Metric
    pub peak_type: PeakType,
    /// Window length: seconds, or metres for pace
    pub period: f64,
    /// Window average
    pub value: f64,
    /// 1-based position among the athlete's peaks of this type and period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Activity start, epoch milliseconds
    pub timestamp: i64,
    /// Window metadata
    #[serde(default)]
    pub extra: PeakExtra,
}
