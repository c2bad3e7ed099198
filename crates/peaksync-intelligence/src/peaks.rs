// ABOUTME: Peak effort extraction driving one rolling window per candidate period
// ABOUTME: Finds best sustained power, normalized/effective power, heart rate and pace
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Peak Extraction
//!
//! The stream is walked once. Every sample is fed into every active window,
//! and after each `add` a full window whose average is `>=` the retained
//! leader replaces it, so among equal averages the latest window wins.
//! Periods longer than the whole stream are skipped up front.

use serde::{Deserialize, Serialize};
use tracing::debug;

use peaksync_core::constants::peaks::{
    DISTANCE_PERIODS, NP_MIN_PERIOD_SECS, TIME_PERIODS, XP_MIN_PERIOD_SECS,
};
use peaksync_core::models::{
    Activity, ActivityBasetype, PeakExtra, PeakRecord, PeakType, StreamSet, StreamType,
};

use crate::powered::PoweredKind;
use crate::rolling_window::{GapPolicy, RollingWindow, WindowAxis, WindowOptions};

/// Periods and gap handling for every peak family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    /// Power periods in seconds
    pub power_periods: Vec<f64>,
    /// Heart rate periods in seconds
    pub heart_rate_periods: Vec<f64>,
    /// Pace distances in metres (runs only)
    pub pace_distances: Vec<f64>,
    /// Shortest period reported for normalized power
    pub np_min_period: f64,
    /// Shortest period reported for effective power
    pub xp_min_period: f64,
    /// Gap handling for power
    pub power_gaps: WindowOptions,
    /// Gap handling for heart rate
    pub heart_rate_gaps: WindowOptions,
    /// Gap handling for pace
    pub pace_gaps: WindowOptions,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            power_periods: TIME_PERIODS.to_vec(),
            heart_rate_periods: TIME_PERIODS.to_vec(),
            pace_distances: DISTANCE_PERIODS.to_vec(),
            np_min_period: NP_MIN_PERIOD_SECS,
            xp_min_period: XP_MIN_PERIOD_SECS,
            power_gaps: WindowOptions::with_policy(GapPolicy::Zero),
            heart_rate_gaps: WindowOptions::with_policy(GapPolicy::Interpolate),
            pace_gaps: WindowOptions::with_policy(GapPolicy::Zero),
        }
    }
}

/// Best window found for one period
#[derive(Debug, Clone, PartialEq)]
pub struct WindowLeader {
    /// Window period
    pub period: f64,
    /// Leading average
    pub value: f64,
    /// Head timestamp
    pub start: f64,
    /// Last timestamp
    pub end: f64,
    /// Buffered samples
    pub samples: usize,
    /// Normalized power of the same window, when tracked
    pub np: Option<f64>,
    /// Effective power of the same window, when tracked
    pub xp: Option<f64>,
}

impl WindowLeader {
    fn snapshot(window: &RollingWindow, value: f64) -> Self {
        Self {
            period: window.period(),
            value,
            start: window.first_time().unwrap_or_default(),
            end: window.last_time().unwrap_or_default(),
            samples: window.len(),
            np: window.powered_avg(PoweredKind::Normalized),
            xp: window.powered_avg(PoweredKind::Effective),
        }
    }

    fn extra(&self) -> PeakExtra {
        PeakExtra {
            start: self.start,
            end: self.end,
            samples: self.samples,
            np: self.np,
            xp: self.xp,
        }
    }
}

/// Leaders of one power pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerLeaders {
    /// Mean power leaders
    pub power: Vec<WindowLeader>,
    /// Normalized power leaders
    pub normalized: Vec<WindowLeader>,
    /// Effective power leaders
    pub effective: Vec<WindowLeader>,
}

/// Stateless driver turning activity streams into peak records
#[derive(Debug, Clone, Default)]
pub struct PeakExtractor {
    config: PeakConfig,
}

impl PeakExtractor {
    /// Extractor with explicit configuration
    #[must_use]
    pub const fn new(config: PeakConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &PeakConfig {
        &self.config
    }

    /// All peaks of one activity.
    ///
    /// Excluded activities and activities without a `time` stream yield
    /// nothing; a missing metric stream skips that family.
    #[must_use]
    pub fn extract(&self, activity: &Activity, streams: &StreamSet) -> Vec<PeakRecord> {
        if activity.peaks_exclude {
            return Vec::new();
        }
        let Some(times) = streams.get(StreamType::Time) else {
            debug!(activity_id = activity.id, "no time stream, skipping peaks");
            return Vec::new();
        };

        let mut peaks = Vec::new();
        let mut emit = |peak_type: PeakType, leaders: Vec<WindowLeader>| {
            peaks.extend(leaders.into_iter().map(|leader| PeakRecord {
                activity_id: activity.id,
                athlete_id: activity.athlete_id,
                basetype: activity.basetype,
                peak_type,
                period: leader.period,
                value: leader.value,
                rank: None,
                timestamp: activity.start_time_ms,
                extra: leader.extra(),
            }));
        };

        if let Some(watts) = streams.get(StreamType::Watts) {
            let leaders = self.power_leaders(times, watts);
            emit(PeakType::Power, leaders.power);
            emit(PeakType::NormalizedPower, leaders.normalized);
            emit(PeakType::EffectivePower, leaders.effective);
        }
        if let Some(heartrate) = streams.get(StreamType::Heartrate) {
            let leaders = find_leaders(
                times,
                heartrate,
                &self.config.heart_rate_periods,
                WindowAxis::Time,
                self.config.heart_rate_gaps,
            );
            emit(PeakType::HeartRate, leaders);
        }
        if activity.basetype == ActivityBasetype::Run {
            if let Some(distance) = streams.get(StreamType::Distance) {
                let leaders = find_leaders(
                    times,
                    distance,
                    &self.config.pace_distances,
                    WindowAxis::Distance,
                    self.config.pace_gaps,
                );
                emit(PeakType::Pace, leaders);
            }
        }

        debug!(
            activity_id = activity.id,
            peaks = peaks.len(),
            "extracted activity peaks"
        );
        peaks
    }

    /// Mean, normalized and effective power leaders in a single pass
    #[must_use]
    pub fn power_leaders(&self, times: &[f64], watts: &[f64]) -> PowerLeaders {
        let total = total_span(times, watts, WindowAxis::Time);
        let mut windows: Vec<RollingWindow> = self
            .config
            .power_periods
            .iter()
            .copied()
            .filter(|&period| period > 0.0 && period <= total)
            .map(|period| {
                let mut window =
                    RollingWindow::with_options(period, WindowAxis::Time, self.config.power_gaps);
                if period >= self.config.np_min_period {
                    window = window.with_powered(PoweredKind::Normalized);
                }
                if period >= self.config.xp_min_period {
                    window = window.with_powered(PoweredKind::Effective);
                }
                window
            })
            .collect();

        let mut power: Vec<Option<WindowLeader>> = vec![None; windows.len()];
        let mut normalized: Vec<Option<WindowLeader>> = vec![None; windows.len()];
        let mut effective: Vec<Option<WindowLeader>> = vec![None; windows.len()];

        for (&time, &value) in times.iter().zip(watts) {
            for (index, window) in windows.iter_mut().enumerate() {
                window.add(time, value);
                if !window.full() {
                    continue;
                }
                challenge(&mut power[index], window, Some(window.avg()));
                challenge(
                    &mut normalized[index],
                    window,
                    window.powered_avg(PoweredKind::Normalized),
                );
                challenge(
                    &mut effective[index],
                    window,
                    window.powered_avg(PoweredKind::Effective),
                );
            }
        }

        PowerLeaders {
            power: power.into_iter().flatten().collect(),
            normalized: normalized.into_iter().flatten().collect(),
            effective: effective.into_iter().flatten().collect(),
        }
    }
}

/// Replace `leader` when `candidate >= leader.value`
fn challenge(leader: &mut Option<WindowLeader>, window: &RollingWindow, candidate: Option<f64>) {
    let Some(value) = candidate else {
        return;
    };
    if leader.as_ref().is_none_or(|current| value >= current.value) {
        *leader = Some(WindowLeader::snapshot(window, value));
    }
}

fn total_span(times: &[f64], values: &[f64], axis: WindowAxis) -> f64 {
    let coordinates: &[f64] = match axis {
        WindowAxis::Time => times,
        WindowAxis::Distance => values,
    };
    let len = times.len().min(values.len());
    let mut finite = coordinates[..len].iter().copied().filter(|v| v.is_finite());
    let Some(first) = finite.next() else {
        return 0.0;
    };
    finite.last().map_or(0.0, |last| last - first)
}

/// Leaders of the plain average for each period that fits in the stream
#[must_use]
pub fn find_leaders(
    times: &[f64],
    values: &[f64],
    periods: &[f64],
    axis: WindowAxis,
    options: WindowOptions,
) -> Vec<WindowLeader> {
    let total = total_span(times, values, axis);
    let mut windows: Vec<RollingWindow> = periods
        .iter()
        .copied()
        .filter(|&period| period > 0.0 && period <= total)
        .map(|period| RollingWindow::with_options(period, axis, options))
        .collect();
    let mut leaders: Vec<Option<WindowLeader>> = vec![None; windows.len()];

    for (&time, &value) in times.iter().zip(values) {
        for (window, leader) in windows.iter_mut().zip(leaders.iter_mut()) {
            window.add(time, value);
            if window.full() {
                challenge(leader, window, Some(window.avg()));
            }
        }
    }

    leaders.into_iter().flatten().collect()
}
