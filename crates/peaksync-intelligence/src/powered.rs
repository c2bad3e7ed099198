// ABOUTME: Fourth-power accumulators for normalized and effective (xPower) power
// ABOUTME: Smooths the raw power signal and averages its fourth power over a window
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Powered averages
//!
//! Both metrics smooth the raw power signal, raise the smoothed value to the
//! fourth power, average that over the window and take the fourth root:
//!
//! - Normalized power: 30 s simple moving average (Coggan)
//! - Effective power (xPower): exponentially weighted average with a 25 s
//!   time constant (Skiba)
//!
//! The smoothing state sees every sample ever pushed, while the fourth-power
//! contributions are evicted together with the window's samples.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use peaksync_core::constants::peaks::{NP_SMOOTHING_SECS, XP_TIME_CONSTANT_SECS};

/// Which powered metric an accumulator computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoweredKind {
    /// 30 s SMA, fourth power
    Normalized,
    /// 25 s EWMA, fourth power
    Effective,
}

#[derive(Debug, Clone)]
enum Smoother {
    Sma {
        period: f64,
        samples: VecDeque<(f64, f64)>,
        weighted_sum: f64,
    },
    Ewma {
        time_constant: f64,
        current: Option<f64>,
        last_time: f64,
    },
}

impl Smoother {
    /// Push one sample and return the smoothed value once it is defined
    fn push(&mut self, time: f64, value: f64) -> Option<f64> {
        match self {
            Self::Sma {
                period,
                samples,
                weighted_sum,
            } => {
                if let Some(&(last_time, _)) = samples.back() {
                    *weighted_sum += value * (time - last_time);
                }
                samples.push_back((time, value));
                while samples.len() > 2 && time - samples[1].0 >= *period {
                    let (head_time, _) = samples[0];
                    let (next_time, next_value) = samples[1];
                    *weighted_sum -= next_value * (next_time - head_time);
                    samples.pop_front();
                }
                let span = time - samples.front().map_or(time, |&(t, _)| t);
                (span >= *period && span > 0.0).then(|| *weighted_sum / span)
            }
            Self::Ewma {
                time_constant,
                current,
                last_time,
            } => {
                let next = match *current {
                    None => value,
                    Some(prev) => {
                        let alpha = 1.0 - (-(time - *last_time) / *time_constant).exp();
                        prev + (value - prev) * alpha
                    }
                };
                *current = Some(next);
                *last_time = time;
                Some(next)
            }
        }
    }
}

/// Fourth-power accumulator bound to one rolling window
#[derive(Debug, Clone)]
pub struct PoweredAccumulator {
    kind: PoweredKind,
    smoother: Smoother,
    /// Per-sample `smoothed^4`, aligned with the owning window's samples
    contributions: VecDeque<Option<f64>>,
    powered_sum: f64,
    weight_sum: f64,
}

impl PoweredAccumulator {
    /// Accumulator with the standard smoothing constants
    #[must_use]
    pub fn new(kind: PoweredKind) -> Self {
        let smoother = match kind {
            PoweredKind::Normalized => Smoother::Sma {
                period: NP_SMOOTHING_SECS,
                samples: VecDeque::new(),
                weighted_sum: 0.0,
            },
            PoweredKind::Effective => Smoother::Ewma {
                time_constant: XP_TIME_CONSTANT_SECS,
                current: None,
                last_time: 0.0,
            },
        };
        Self {
            kind,
            smoother,
            contributions: VecDeque::new(),
            powered_sum: 0.0,
            weight_sum: 0.0,
        }
    }

    /// Metric computed by this accumulator
    #[must_use]
    pub const fn kind(&self) -> PoweredKind {
        self.kind
    }

    /// Record a sample appended to the window; `weight` is its interval length
    pub(crate) fn push(&mut self, time: f64, value: f64, weight: f64) {
        let contribution = self.smoother.push(time, value).map(|smoothed| {
            let powered = smoothed.powi(4);
            if weight > 0.0 {
                self.powered_sum += powered * weight;
                self.weight_sum += weight;
            }
            powered
        });
        self.contributions.push_back(contribution);
    }

    /// Mirror the window dropping its head; `next_weight` is the interval of
    /// the sample that becomes the new head
    pub(crate) fn shift(&mut self, next_weight: f64) {
        self.contributions.pop_front();
        if let Some(Some(powered)) = self.contributions.front() {
            if next_weight > 0.0 {
                self.powered_sum -= powered * next_weight;
                self.weight_sum -= next_weight;
            }
        }
    }

    /// Fourth root of the mean fourth power, once any sample contributed
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        (self.weight_sum > 0.0).then(|| (self.powered_sum / self.weight_sum).max(0.0).powf(0.25))
    }
}
