// ABOUTME: Sliding time- or distance-bounded window over irregular activity samples
// ABOUTME: Pads sampling gaps, evicts old samples, and maintains a time-weighted average
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Rolling Window
//!
//! Each sample represents the interval ending at its timestamp, so the first
//! sample in the buffer (the head) only anchors the span and carries no
//! weight. For one-second sampling `avg()` is therefore the arithmetic mean of
//! the last `period` samples.
//!
//! Sampling gaps are padded with synthetic samples at `ideal_gap` spacing.
//! Short gaps (up to `max_gap`) are filled with the midpoint of the values on
//! either side; longer gaps follow the window's [`GapPolicy`].
//!
//! In [`WindowAxis::Distance`] mode the sample value is cumulative distance:
//! span and eviction key off distance and `avg()` is the mean speed.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use peaksync_core::constants::gaps::{IDEAL_GAP, MAX_GAP};

use crate::powered::{PoweredAccumulator, PoweredKind};

/// How synthetic samples are valued inside a gap longer than `max_gap`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Dropout means stopped: zero power, constant distance
    #[default]
    Zero,
    /// Fill with the midpoint (time axis) or linear ramp (distance axis)
    Interpolate,
}

/// What bounds the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowAxis {
    /// Period in seconds over `(time, value)` samples
    #[default]
    Time,
    /// Period in metres over `(time, cumulative distance)` samples
    Distance,
}

/// Gap handling parameters shared by every window of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowOptions {
    /// Expected sample spacing in seconds
    pub ideal_gap: f64,
    /// Gaps up to this many seconds are treated as jitter
    pub max_gap: f64,
    /// Fill policy for longer gaps
    pub gap_policy: GapPolicy,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            ideal_gap: IDEAL_GAP,
            max_gap: MAX_GAP,
            gap_policy: GapPolicy::Zero,
        }
    }
}

impl WindowOptions {
    /// Default gaps with the given long-gap policy
    #[must_use]
    pub fn with_policy(gap_policy: GapPolicy) -> Self {
        Self {
            gap_policy,
            ..Self::default()
        }
    }
}

/// Sliding window over `(timestamp, value)` samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: f64,
    axis: WindowAxis,
    options: WindowOptions,
    times: VecDeque<f64>,
    values: VecDeque<f64>,
    weighted_sum: f64,
    normalized: Option<PoweredAccumulator>,
    effective: Option<PoweredAccumulator>,
}

impl RollingWindow {
    /// Time-bounded window with default gap handling
    #[must_use]
    pub fn new(period: f64) -> Self {
        Self::with_options(period, WindowAxis::Time, WindowOptions::default())
    }

    /// Window with explicit axis and gap handling
    #[must_use]
    pub fn with_options(period: f64, axis: WindowAxis, options: WindowOptions) -> Self {
        Self {
            period,
            axis,
            options,
            times: VecDeque::new(),
            values: VecDeque::new(),
            weighted_sum: 0.0,
            normalized: None,
            effective: None,
        }
    }

    /// Also maintain a powered average of `kind`; must be enabled before the
    /// first sample
    #[must_use]
    pub fn with_powered(mut self, kind: PoweredKind) -> Self {
        let accumulator = Some(PoweredAccumulator::new(kind));
        match kind {
            PoweredKind::Normalized => self.normalized = accumulator,
            PoweredKind::Effective => self.effective = accumulator,
        }
        self
    }

    /// Configured period (seconds or metres)
    #[must_use]
    pub const fn period(&self) -> f64 {
        self.period
    }

    /// Append one sample, padding any gap since the previous one.
    ///
    /// Out-of-order or non-finite timestamps are ignored.
    pub fn add(&mut self, timestamp: f64, value: f64) {
        if !timestamp.is_finite() || !value.is_finite() {
            return;
        }
        let Some((&prev_time, &prev_value)) = self.times.back().zip(self.values.back()) else {
            self.push(timestamp, value);
            return;
        };
        let gap = timestamp - prev_time;
        if gap < 0.0 {
            return;
        }
        if gap > self.options.ideal_gap && self.options.ideal_gap > 0.0 {
            self.pad_gap(prev_time, prev_value, timestamp, value, gap);
        }
        self.push(timestamp, value);
        self.shift();
    }

    fn pad_gap(&mut self, prev_time: f64, prev_value: f64, time: f64, value: f64, gap: f64) {
        let ideal = self.options.ideal_gap;
        let steps = (gap / ideal).ceil();
        let synthetic = (steps as usize).saturating_sub(1);
        let long_gap = gap > self.options.max_gap;
        for k in 1..=synthetic {
            let offset = ideal * k as f64;
            let synthetic_time = prev_time + offset;
            if synthetic_time >= time {
                break;
            }
            let synthetic_value = match (self.axis, long_gap, self.options.gap_policy) {
                (WindowAxis::Time, true, GapPolicy::Zero) => 0.0,
                (WindowAxis::Time, _, _) => (prev_value + value) / 2.0,
                (WindowAxis::Distance, true, GapPolicy::Zero) => prev_value,
                (WindowAxis::Distance, _, _) => prev_value + (value - prev_value) * offset / gap,
            };
            self.push(synthetic_time, synthetic_value);
        }
    }

    fn push(&mut self, time: f64, value: f64) {
        let weight = self.times.back().map_or(0.0, |&prev| time - prev);
        if self.axis == WindowAxis::Time {
            self.weighted_sum += value * weight;
        }
        self.times.push_back(time);
        self.values.push_back(value);
        for accumulator in [&mut self.normalized, &mut self.effective]
            .into_iter()
            .flatten()
        {
            accumulator.push(time, value, weight);
        }
    }

    /// Drop the head while the span excluding it still reaches the period
    fn shift(&mut self) {
        while self.times.len() > 1 {
            let last = self.position(self.times.len() - 1);
            if last - self.position(1) < self.period {
                break;
            }
            let next_weight = self.times[1] - self.times[0];
            if self.axis == WindowAxis::Time {
                self.weighted_sum -= self.values[1] * next_weight;
            }
            for accumulator in [&mut self.normalized, &mut self.effective]
                .into_iter()
                .flatten()
            {
                accumulator.shift(next_weight);
            }
            self.times.pop_front();
            self.values.pop_front();
        }
    }

    /// Coordinate along the window axis
    fn position(&self, index: usize) -> f64 {
        match self.axis {
            WindowAxis::Time => self.times[index],
            WindowAxis::Distance => self.values[index],
        }
    }

    /// Span along the window axis, `last - head`
    #[must_use]
    pub fn span(&self) -> f64 {
        if self.times.len() < 2 {
            return 0.0;
        }
        self.position(self.times.len() - 1) - self.position(0)
    }

    /// Seconds between head and last sample
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        match (self.times.front(), self.times.back()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Span has reached the period
    #[must_use]
    pub fn full(&self) -> bool {
        self.times.len() > 1 && self.span() >= self.period
    }

    /// Time-weighted mean over the span, or mean speed on the distance axis
    #[must_use]
    pub fn avg(&self) -> f64 {
        let elapsed = self.elapsed();
        if elapsed <= 0.0 {
            return match self.axis {
                WindowAxis::Time => self.values.back().copied().unwrap_or(0.0),
                WindowAxis::Distance => 0.0,
            };
        }
        match self.axis {
            WindowAxis::Time => self.weighted_sum / elapsed,
            WindowAxis::Distance => self.span() / elapsed,
        }
    }

    /// Powered average of `kind`, when enabled and defined
    #[must_use]
    pub fn powered_avg(&self, kind: PoweredKind) -> Option<f64> {
        match kind {
            PoweredKind::Normalized => self.normalized.as_ref()?.average(),
            PoweredKind::Effective => self.effective.as_ref()?.average(),
        }
    }

    /// Timestamp of the head sample
    #[must_use]
    pub fn first_time(&self) -> Option<f64> {
        self.times.front().copied()
    }

    /// Timestamp of the newest sample
    #[must_use]
    pub fn last_time(&self) -> Option<f64> {
        self.times.back().copied()
    }

    /// Samples currently buffered, head and synthetic samples included
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// No samples buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Buffered `(timestamp, value)` pairs, head first
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Independent deep copy
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }
}
