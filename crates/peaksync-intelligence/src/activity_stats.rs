// ABOUTME: Whole-activity summary statistics and Training Stress Score calculation
// ABOUTME: Elapsed/active time, heart rate, power, normalized power, IF and TSS
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use peaksync_core::constants::metrics::TSS_BASE_MULTIPLIER;
use peaksync_core::errors::{AppError, AppResult};
use peaksync_core::models::{ActivityStats, StreamSet, StreamType};

use crate::powered::PoweredKind;
use crate::rolling_window::{RollingWindow, WindowAxis, WindowOptions};

/// Training Stress Score
///
/// Formula: `duration_hours x IF² x 100` where `IF = NP / FTP`.
///
/// # Scientific References
///
/// - Coggan, A. & Allen, H. (2010). "Training and Racing with a Power Meter." `VeloPress`.
///
/// # Errors
///
/// Returns `AppError::invalid_input` if ftp is not positive or the duration
/// is negative.
pub fn training_stress_score(
    normalized_power: f64,
    ftp: f64,
    duration_secs: f64,
) -> AppResult<f64> {
    if ftp <= 0.0 {
        return Err(AppError::invalid_input("FTP must be greater than zero"));
    }
    if duration_secs < 0.0 {
        return Err(AppError::invalid_input("Duration cannot be negative"));
    }
    let intensity_factor = normalized_power / ftp;
    let hours = duration_secs / 3600.0;
    Ok((hours * intensity_factor * intensity_factor * TSS_BASE_MULTIPLIER).round())
}

/// Normalized power of a whole power stream, once 30 s of data exist
#[must_use]
pub fn normalized_power(times: &[f64], watts: &[f64], options: WindowOptions) -> Option<f64> {
    let elapsed = match (times.first(), times.last()) {
        (Some(first), Some(last)) if last > first => last - first,
        _ => return None,
    };
    let mut window = RollingWindow::with_options(elapsed, WindowAxis::Time, options)
        .with_powered(PoweredKind::Normalized);
    for (&time, &value) in times.iter().zip(watts) {
        window.add(time, value);
    }
    window.powered_avg(PoweredKind::Normalized)
}

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| v.is_finite())
}

fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = finite(values).fold((0.0, 0_usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Summary statistics from the activity's streams.
///
/// `ftp` enables intensity factor and TSS.
#[must_use]
pub fn compute_activity_stats(
    streams: &StreamSet,
    ftp: Option<f64>,
    power_gaps: WindowOptions,
) -> ActivityStats {
    let mut stats = ActivityStats::default();
    let Some(times) = streams.get(StreamType::Time) else {
        return stats;
    };
    stats.elapsed_time = match (times.first(), times.last()) {
        (Some(first), Some(last)) => (last - first).max(0.0),
        _ => 0.0,
    };
    stats.active_time = streams
        .get(StreamType::Active)
        .map_or(stats.elapsed_time, |active| {
            times
                .windows(2)
                .zip(active.iter().skip(1))
                .filter(|(_, flag)| **flag > 0.0)
                .map(|(pair, _)| (pair[1] - pair[0]).max(0.0))
                .sum()
        });

    if let Some(distance) = streams.get(StreamType::Distance) {
        let mut values = finite(distance);
        let first = values.next();
        stats.distance = first.map(|first| values.last().map_or(0.0, |last| last - first));
    }

    if let Some(heartrate) = streams.get(StreamType::Heartrate) {
        stats.average_heart_rate = mean(heartrate);
        stats.max_heart_rate = finite(heartrate).reduce(f64::max);
    }

    if let Some(watts) = streams.get(StreamType::Watts) {
        stats.average_power = mean(watts);
        stats.normalized_power = normalized_power(times, watts, power_gaps);
        let effort = stats.normalized_power.or(stats.average_power);
        if let (Some(effort), Some(ftp)) = (effort, ftp.filter(|ftp| *ftp > 0.0)) {
            stats.intensity_factor = Some(effort / ftp);
            stats.tss = training_stress_score(effort, ftp, stats.active_time).ok();
        }
    }

    stats
}
